// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting tests across workers.
//!
//! Workers never share tests. If every test has a recorded duration, [`DurationPartitioner`]
//! balances the expected time per worker; otherwise [`CountPartitioner`] balances the number of
//! tests.

use crate::test_case::TestCase;
use std::{sync::Arc, time::Duration};

/// Splits tests round robin into `min(workers, tests)` lists.
#[derive(Clone, Copy, Debug)]
pub struct CountPartitioner {
    workers: usize,
}

impl CountPartitioner {
    /// Creates a partitioner for `workers` workers. 0 is treated as 1.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Splits `tests`. Returns no lists if there are no tests.
    pub fn partition(&self, tests: Vec<Arc<TestCase>>) -> Vec<Vec<Arc<TestCase>>> {
        let count = self.workers.min(tests.len());
        let mut lists = vec![Vec::new(); count];
        for (index, test_case) in tests.into_iter().enumerate() {
            lists[index % count].push(test_case);
        }
        lists
    }
}

/// Splits tests so that each worker's expected total duration is about the same.
#[derive(Clone, Copy, Debug)]
pub struct DurationPartitioner {
    workers: usize,
}

impl DurationPartitioner {
    /// Creates a partitioner for `workers` workers. 0 is treated as 1.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Splits tests with their expected durations.
    ///
    /// Tests are taken longest first. Each of up to `workers` lists is filled while it stays
    /// within the average duration per worker, and always gets at least one test. Remaining
    /// tests go to the list with the smallest total.
    pub fn partition(&self, tests: Vec<(Arc<TestCase>, Duration)>) -> Vec<Vec<Arc<TestCase>>> {
        let mut sorted = tests;
        sorted.sort_by(|(_, a), (_, b)| b.cmp(a));
        let total = sorted
            .iter()
            .fold(Duration::ZERO, |total, (_, duration)| total.saturating_add(*duration));
        let target = total / u32::try_from(self.workers).unwrap_or(u32::MAX);

        let mut remaining = sorted.into_iter().peekable();
        let mut lists: Vec<(Vec<Arc<TestCase>>, Duration)> = Vec::new();
        while lists.len() < self.workers {
            let Some((test_case, duration)) = remaining.next() else {
                break;
            };
            let mut current = vec![test_case];
            let mut current_duration = duration;
            while let Some((_, next)) = remaining.peek() {
                if current_duration.saturating_add(*next) > target {
                    break;
                }
                let Some((test_case, duration)) = remaining.next() else {
                    break;
                };
                current.push(test_case);
                current_duration = current_duration.saturating_add(duration);
            }
            lists.push((current, current_duration));
        }

        for (test_case, duration) in remaining {
            // `lists` is non-empty here: the loop above only ends early when tests run out.
            if let Some((list, total)) = lists.iter_mut().min_by_key(|(_, total)| *total) {
                list.push(test_case);
                *total = total.saturating_add(duration);
            }
        }

        lists.into_iter().map(|(list, _)| list).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn tests(count: usize) -> Vec<Arc<TestCase>> {
        (0..count)
            .map(|index| {
                let name = format!("Suite.Test{index}");
                Arc::new(TestCase::new(&name, &name, "/build/tests"))
            })
            .collect()
    }

    fn names(lists: &[Vec<Arc<TestCase>>]) -> Vec<Vec<&str>> {
        lists
            .iter()
            .map(|list| list.iter().map(|tc| tc.fully_qualified_name()).collect())
            .collect()
    }

    #[test_case(5, 2, &[3, 2]; "more tests than workers")]
    #[test_case(2, 8, &[1, 1]; "more workers than tests")]
    #[test_case(0, 4, &[]; "no tests")]
    #[test_case(3, 0, &[3]; "zero workers")]
    fn count_partitioner_sizes(test_count: usize, workers: usize, expected: &[usize]) {
        let lists = CountPartitioner::new(workers).partition(tests(test_count));
        let sizes: Vec<_> = lists.iter().map(Vec::len).collect();
        assert_eq!(sizes, expected);
    }

    #[test]
    fn count_partitioner_is_round_robin() {
        let lists = CountPartitioner::new(2).partition(tests(5));
        assert_eq!(
            names(&lists),
            vec![
                vec!["Suite.Test0", "Suite.Test2", "Suite.Test4"],
                vec!["Suite.Test1", "Suite.Test3"],
            ]
        );
    }

    #[test]
    fn duration_partitioner_balances_expected_time() {
        let durations = [100, 10, 50, 40, 30, 20, 60];
        let input: Vec<_> = tests(durations.len())
            .into_iter()
            .zip(durations.map(Duration::from_millis))
            .collect();
        // Total 310ms, so each worker aims for 103ms.
        let lists = DurationPartitioner::new(3).partition(input);
        assert_eq!(
            names(&lists),
            vec![
                vec!["Suite.Test0"],
                vec!["Suite.Test6", "Suite.Test4", "Suite.Test5"],
                vec!["Suite.Test2", "Suite.Test3", "Suite.Test1"],
            ]
        );
    }

    #[test]
    fn duration_partitioner_with_fewer_tests_than_workers() {
        let input: Vec<_> = tests(2)
            .into_iter()
            .zip([Duration::from_millis(5), Duration::from_millis(7)])
            .collect();
        let lists = DurationPartitioner::new(4).partition(input);
        assert_eq!(names(&lists), vec![vec!["Suite.Test1"], vec!["Suite.Test0"]]);
    }

    #[test]
    fn duration_partitioner_saturates_huge_durations() {
        let input: Vec<_> = tests(3)
            .into_iter()
            .zip([Duration::MAX, Duration::MAX, Duration::from_millis(1)])
            .collect();
        let lists = DurationPartitioner::new(2).partition(input);
        let sizes: Vec<_> = lists.iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 3);
        assert_eq!(lists.len(), 2);
    }
}
