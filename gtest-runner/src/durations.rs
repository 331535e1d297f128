// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recorded test durations.
//!
//! Each executable gets a JSON file next to it that maps fully-qualified test names to the
//! duration of their last run, in milliseconds. The durations drive [`DurationPartitioner`]
//! and the [`SchedulingAnalyzer`] statistics.
//!
//! [`DurationPartitioner`]: crate::partition::DurationPartitioner

use crate::{
    errors::{DisplayErrorChain, DurationStoreError},
    test_case::TestCase,
    test_result::{TestOutcome, TestResult},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, warn};

/// Appended to an executable's path to name its durations file.
pub const DURATIONS_FILE_EXTENSION: &str = ".gta.testdurations";

/// Serializes writes to every durations file of this process.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct DurationsFile {
    durations_ms: BTreeMap<String, u64>,
}

/// Reads and writes recorded test durations.
#[derive(Clone, Copy, Debug, Default)]
pub struct DurationStore;

impl DurationStore {
    /// The durations file for `executable`.
    pub fn durations_file(executable: &Utf8Path) -> Utf8PathBuf {
        format!("{executable}{DURATIONS_FILE_EXTENSION}").into()
    }

    /// Reads the recorded durations of `executable`. A missing file has no durations.
    pub fn read(executable: &Utf8Path) -> Result<BTreeMap<String, Duration>, DurationStoreError> {
        let path = Self::durations_file(executable);
        let file = read_file(&path)?;
        Ok(file
            .durations_ms
            .into_iter()
            .map(|(name, ms)| (name, Duration::from_millis(ms)))
            .collect())
    }

    /// Reads the recorded durations of `executable`, logging a warning if they can't be read.
    pub fn read_or_empty(executable: &Utf8Path) -> BTreeMap<String, Duration> {
        Self::read(executable).unwrap_or_else(|error| {
            warn!("{}", DisplayErrorChain::new(&error));
            BTreeMap::new()
        })
    }

    /// Returns every test with its recorded duration, or `None` if any test has none.
    ///
    /// Each executable's file is read once.
    pub fn expected_durations(tests: &[Arc<TestCase>]) -> Option<Vec<(Arc<TestCase>, Duration)>> {
        let mut files: HashMap<&Utf8Path, BTreeMap<String, Duration>> = HashMap::new();
        let mut durations = Vec::with_capacity(tests.len());
        for test_case in tests {
            let recorded = files
                .entry(test_case.executable())
                .or_insert_with(|| Self::read_or_empty(test_case.executable()));
            match recorded.get(test_case.fully_qualified_name()) {
                Some(duration) => durations.push((Arc::clone(test_case), *duration)),
                None => {
                    debug!(
                        "no recorded duration for `{}`, not splitting by duration",
                        test_case.fully_qualified_name()
                    );
                    return None;
                }
            }
        }
        Some(durations)
    }

    /// Records the durations of passed and failed results.
    ///
    /// Durations are rounded up to whole milliseconds. Existing entries for other tests are
    /// kept; an unreadable file is replaced.
    pub fn record(results: &[TestResult]) -> Result<(), DurationStoreError> {
        let mut by_executable: IndexMap<&Utf8Path, Vec<&TestResult>> = IndexMap::new();
        for result in results.iter().filter(|result| {
            matches!(result.outcome(), TestOutcome::Passed | TestOutcome::Failed)
        }) {
            by_executable
                .entry(result.test_case().executable())
                .or_default()
                .push(result);
        }

        let _guard = WRITE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (executable, results) in by_executable {
            let path = Self::durations_file(executable);
            let mut file = read_file(&path).unwrap_or_else(|error| {
                warn!("{}", DisplayErrorChain::new(&error));
                DurationsFile::default()
            });
            for result in results {
                file.durations_ms.insert(
                    result.test_case().fully_qualified_name().to_owned(),
                    rounded_up_millis(result.duration()),
                );
            }

            let json = serde_json::to_string_pretty(&file)
                .map_err(io::Error::other)
                .and_then(|json| std::fs::write(&path, json));
            json.map_err(|error| DurationStoreError::Write {
                path: path.clone(),
                error,
            })?;
            debug!("recorded durations in `{path}`");
        }
        Ok(())
    }
}

fn read_file(path: &Utf8Path) -> Result<DurationsFile, DurationStoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Ok(DurationsFile::default());
        }
        Err(error) => {
            return Err(DurationStoreError::Read {
                path: path.to_owned(),
                error,
            });
        }
    };
    serde_json::from_str(&contents).map_err(|error| DurationStoreError::Parse {
        path: path.to_owned(),
        error,
    })
}

fn rounded_up_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

type TestKey = (Utf8PathBuf, String);

/// Compares expected test durations with the observed ones.
#[derive(Debug, Default)]
pub struct SchedulingAnalyzer {
    inner: Mutex<AnalyzerInner>,
}

#[derive(Debug, Default)]
struct AnalyzerInner {
    expected: HashMap<TestKey, Duration>,
    actual: HashMap<TestKey, Duration>,
}

/// Summary of how far observed durations were from the expected ones.
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulingStatistics {
    /// The number of tests with both an expected and an actual duration.
    pub test_count: usize,

    /// The average of expected minus actual, in milliseconds.
    pub average_difference_ms: f64,

    /// The standard deviation of the differences, in milliseconds.
    pub standard_deviation_ms: f64,

    /// Up to 10 tests with the largest absolute differences, largest first, with their expected
    /// and actual durations.
    pub largest_differences: Vec<(String, Duration, Duration)>,
}

impl SchedulingAnalyzer {
    /// Creates an empty analyzer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the expected duration of a test. The first recorded value wins.
    pub fn add_expected(&self, test_case: &TestCase, duration: Duration) {
        self.lock().expected.entry(key(test_case)).or_insert(duration);
    }

    /// Records the observed duration of a test. The first recorded value wins.
    pub fn add_actual(&self, test_case: &TestCase, duration: Duration) {
        self.lock().actual.entry(key(test_case)).or_insert(duration);
    }

    /// Computes statistics, or `None` if no test has both durations.
    pub fn statistics(&self) -> Option<SchedulingStatistics> {
        let inner = self.lock();
        let mut differences: Vec<(&TestKey, Duration, Duration, f64)> = inner
            .expected
            .iter()
            .filter_map(|(key, expected)| {
                let actual = inner.actual.get(key)?;
                let difference = expected.as_secs_f64() * 1000.0 - actual.as_secs_f64() * 1000.0;
                Some((key, *expected, *actual, difference))
            })
            .collect();
        if differences.is_empty() {
            return None;
        }
        differences.sort_by(|a, b| b.3.abs().total_cmp(&a.3.abs()).then_with(|| a.0.cmp(b.0)));

        let count = differences.len() as f64;
        let average = differences.iter().map(|d| d.3).sum::<f64>() / count;
        let variance = differences
            .iter()
            .map(|d| (d.3 - average) * (d.3 - average))
            .sum::<f64>()
            / count;

        Some(SchedulingStatistics {
            test_count: differences.len(),
            average_difference_ms: average,
            standard_deviation_ms: variance.sqrt(),
            largest_differences: differences
                .iter()
                .take(10)
                .map(|((_, name), expected, actual, _)| (name.clone(), *expected, *actual))
                .collect(),
        })
    }

    /// Logs the statistics at debug level.
    pub fn log_statistics(&self) {
        let (expected, actual) = {
            let inner = self.lock();
            (inner.expected.len(), inner.actual.len())
        };
        debug!("scheduling statistics: {expected} expected durations, {actual} actual durations");
        let Some(statistics) = self.statistics() else {
            debug!("no test has both an expected and an actual duration");
            return;
        };
        debug!(
            "{} tests: average difference {:.1}ms, standard deviation {:.1}ms",
            statistics.test_count, statistics.average_difference_ms, statistics.standard_deviation_ms
        );
        for (name, expected, actual) in &statistics.largest_differences {
            debug!(
                "  {name}: expected {}, actual {}",
                humantime::format_duration(*expected),
                humantime::format_duration(*actual)
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AnalyzerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn key(test_case: &TestCase) -> TestKey {
    (
        test_case.executable().to_owned(),
        test_case.fully_qualified_name().to_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn test_case(executable: &Utf8Path, name: &str) -> Arc<TestCase> {
        Arc::new(TestCase::new(name, name, executable))
    }

    #[test]
    fn records_and_reads_durations() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let exe = dir.path().join("tests.exe");
        assert_eq!(DurationStore::read(&exe).expect("missing file is empty"), BTreeMap::new());

        let a = test_case(&exe, "Suite.A");
        let b = test_case(&exe, "Suite.B");
        let c = test_case(&exe, "Suite.C");
        DurationStore::record(&[
            TestResult::passed(a.clone(), Duration::from_micros(1500)),
            TestResult::failed(b.clone(), Duration::from_millis(7), "", ""),
            TestResult::skipped(c.clone(), Duration::from_millis(3)),
        ])
        .expect("recorded");
        assert_eq!(
            DurationStore::read(&exe).expect("read"),
            btreemap! {
                "Suite.A".to_owned() => Duration::from_millis(2),
                "Suite.B".to_owned() => Duration::from_millis(7),
            }
        );

        // Later writes update entries and keep the others.
        DurationStore::record(&[TestResult::passed(a.clone(), Duration::from_millis(4))])
            .expect("recorded");
        let durations = DurationStore::read(&exe).expect("read");
        assert_eq!(durations["Suite.A"], Duration::from_millis(4));
        assert_eq!(durations["Suite.B"], Duration::from_millis(7));

        assert_eq!(DurationStore::expected_durations(&[a.clone(), c]), None);
        assert_eq!(
            DurationStore::expected_durations(&[a.clone(), b.clone()]),
            Some(vec![(a, Duration::from_millis(4)), (b, Duration::from_millis(7))])
        );
    }

    #[test]
    fn corrupt_file_is_replaced() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let exe = dir.path().join("tests.exe");
        std::fs::write(DurationStore::durations_file(&exe), "not json").expect("wrote file");

        assert!(matches!(
            DurationStore::read(&exe),
            Err(DurationStoreError::Parse { .. })
        ));
        assert_eq!(DurationStore::read_or_empty(&exe), BTreeMap::new());

        let a = test_case(&exe, "Suite.A");
        DurationStore::record(&[TestResult::passed(a, Duration::from_millis(1))])
            .expect("recorded");
        assert_eq!(DurationStore::read(&exe).expect("read").len(), 1);
    }

    #[test]
    fn analyzer_statistics() {
        let analyzer = SchedulingAnalyzer::new();
        assert_eq!(analyzer.statistics(), None);

        let exe = Utf8Path::new("/build/tests");
        let a = test_case(exe, "Suite.A");
        let b = test_case(exe, "Suite.B");
        let c = test_case(exe, "Suite.C");
        analyzer.add_expected(&a, Duration::from_millis(10));
        analyzer.add_actual(&a, Duration::from_millis(14));
        analyzer.add_expected(&b, Duration::from_millis(10));
        analyzer.add_actual(&b, Duration::from_millis(8));
        analyzer.add_actual(&b, Duration::from_millis(100));
        analyzer.add_expected(&c, Duration::from_millis(5));

        let statistics = analyzer.statistics().expect("two tests have both durations");
        assert_eq!(statistics.test_count, 2);
        // Differences are -4ms and 2ms.
        assert!((statistics.average_difference_ms - -1.0).abs() < 1e-9);
        assert!((statistics.standard_deviation_ms - 3.0).abs() < 1e-9);
        assert_eq!(
            statistics.largest_differences,
            vec![
                ("Suite.A".to_owned(), Duration::from_millis(10), Duration::from_millis(14)),
                ("Suite.B".to_owned(), Duration::from_millis(10), Duration::from_millis(8)),
            ]
        );
        analyzer.log_statistics();
    }
}
