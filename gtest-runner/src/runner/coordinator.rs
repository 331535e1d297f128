// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    CancelHandle,
    executor::{PreparedExecutor, RunContext},
};
use crate::{
    config::GtestConfig,
    durations::{DurationStore, SchedulingAnalyzer},
    partition::{CountPartitioner, DurationPartitioner},
    reporter::{ExecutableResult, ExitCodeTestsReporter, Reporter},
    test_case::TestCase,
};
use debug_ignore::DebugIgnore;
use std::sync::Arc;
use tracing::{debug, debug_span, error};

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    workers: Option<usize>,
    parallel_execution: Option<bool>,
}

impl TestRunnerBuilder {
    /// Sets the number of workers, overriding the configured maximum.
    pub fn set_workers(&mut self, workers: usize) -> &mut Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Enables or disables splitting tests across workers, overriding the configuration.
    pub fn set_parallel_execution(&mut self, parallel_execution: bool) -> &mut Self {
        self.parallel_execution = Some(parallel_execution);
        self
    }

    /// Creates a new test runner.
    pub fn build(self, config: &GtestConfig) -> TestRunner<'_> {
        TestRunner {
            config,
            workers: self.workers,
            parallel_execution: self.parallel_execution,
            cancel: CancelHandle::new(),
        }
    }
}

/// Runs tests across worker threads.
#[derive(Debug)]
pub struct TestRunner<'a> {
    config: &'a GtestConfig,
    workers: Option<usize>,
    parallel_execution: Option<bool>,
    cancel: CancelHandle,
}

impl TestRunner<'_> {
    /// Returns a handle that cancels this runner's runs.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The number of workers used for `tests`.
    ///
    /// Worker counts are taken from the settings of the first test's executable.
    pub fn worker_count(&self, tests: &[Arc<TestCase>]) -> usize {
        let Some(first) = tests.first() else {
            return 1;
        };
        let settings = self.config.settings_for(first.executable());
        let parallel = self
            .parallel_execution
            .unwrap_or(settings.parallel_execution);
        if parallel {
            self.workers.unwrap_or(settings.max_workers).max(1)
        } else {
            1
        }
    }

    /// Runs `tests`, reporting progress to `reporter`, then reports the exit-code tests.
    ///
    /// Returns the exit codes of every test process invocation.
    pub fn execute(
        &self,
        tests: &[Arc<TestCase>],
        reporter: &dyn Reporter,
    ) -> Vec<ExecutableResult> {
        let analyzer = SchedulingAnalyzer::new();
        let workers = self.worker_count(tests);
        let lists = split_tests(tests, workers, &analyzer);
        debug!(
            "running {} tests on {} of at most {workers} workers",
            tests.len(),
            lists.len()
        );

        let context = RunContext {
            config: self.config,
            reporter: DebugIgnore(reporter),
            cancel: &self.cancel,
            analyzer: &analyzer,
        };
        let executable_results = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(lists.len());
            let mut unspawned = Vec::new();
            for (id, list) in lists.iter().enumerate() {
                let spawned = std::thread::Builder::new()
                    .name(format!("gtest-worker-{id}"))
                    .spawn_scoped(scope, move || run_worker(context, id, list));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(spawn_error) => {
                        error!(
                            "failed to start worker {id}, running its tests on the current \
                             thread: {spawn_error}"
                        );
                        unspawned.push((id, list));
                    }
                }
            }

            let mut results: Vec<ExecutableResult> = unspawned
                .into_iter()
                .flat_map(|(id, list)| run_worker(context, id, list))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(worker_results) => results.extend(worker_results),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            results
        });

        if self.cancel.is_canceled() {
            debug!("run canceled, not reporting exit-code tests");
        } else {
            ExitCodeTestsReporter::new(reporter, self.config)
                .report_exit_code_test_cases(&executable_results);
        }
        analyzer.log_statistics();
        executable_results
    }
}

fn run_worker(context: RunContext<'_>, id: usize, tests: &[Arc<TestCase>]) -> Vec<ExecutableResult> {
    let _span = debug_span!("worker", id).entered();
    debug!("starting with {} tests", tests.len());
    let results = PreparedExecutor::new(context, id).run(tests);
    debug!("done");
    results
}

/// Splits tests into at most `workers` lists.
///
/// Exit-code tests have no recorded durations; they join a list that runs their executable.
fn split_tests(
    tests: &[Arc<TestCase>],
    workers: usize,
    analyzer: &SchedulingAnalyzer,
) -> Vec<Vec<Arc<TestCase>>> {
    let (exit_code_tests, regular): (Vec<_>, Vec<_>) = tests
        .iter()
        .cloned()
        .partition(|test_case| test_case.is_exit_code_test());

    let mut lists = match DurationStore::expected_durations(&regular) {
        Some(durations) if !regular.is_empty() => {
            debug!("splitting tests by their recorded durations");
            for (test_case, duration) in &durations {
                analyzer.add_expected(test_case, *duration);
            }
            DurationPartitioner::new(workers).partition(durations)
        }
        _ => CountPartitioner::new(workers).partition(regular),
    };

    for exit_code_test in exit_code_tests {
        let same_executable = lists.iter().position(|list| {
            list.iter()
                .any(|test_case| test_case.executable() == exit_code_test.executable())
        });
        match same_executable {
            Some(index) => lists[index].push(exit_code_test),
            None => {
                let shortest = (0..lists.len()).min_by_key(|&index| lists[index].len());
                match shortest {
                    Some(index) if lists.len() >= workers => lists[index].push(exit_code_test),
                    _ => lists.push(vec![exit_code_test]),
                }
            }
        }
    }
    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::test_config, reporter::test_helpers::RecordingReporter};
    use pretty_assertions::assert_eq;

    fn tests(executable: &str, names: &[&str]) -> Vec<Arc<TestCase>> {
        names
            .iter()
            .map(|name| Arc::new(TestCase::new(*name, *name, executable)))
            .collect()
    }

    fn names(lists: &[Vec<Arc<TestCase>>]) -> Vec<Vec<&str>> {
        lists
            .iter()
            .map(|list| list.iter().map(|tc| tc.fully_qualified_name()).collect())
            .collect()
    }

    #[test]
    fn exit_code_tests_join_their_executable() {
        let mut all = tests("/nonexistent/a", &["A.1", "A.2", "A.3"]);
        all.push(Arc::new(TestCase::exit_code_test("/nonexistent/a", "ExitCode")));
        all.push(Arc::new(TestCase::exit_code_test("/nonexistent/b", "ExitCode")));

        let lists = split_tests(&all, 2, &SchedulingAnalyzer::new());
        assert_eq!(
            names(&lists),
            vec![
                vec!["A.1", "A.3", "a.ExitCode"],
                vec!["A.2", "b.ExitCode"],
            ]
        );
    }

    #[test]
    fn only_exit_code_tests() {
        let all = vec![Arc::new(TestCase::exit_code_test("/nonexistent/a", "ExitCode"))];
        let lists = split_tests(&all, 4, &SchedulingAnalyzer::new());
        assert_eq!(names(&lists), vec![vec!["a.ExitCode"]]);
    }

    #[test]
    fn worker_count_honors_overrides() {
        let config = test_config("[settings]\nmax-workers = 3\n");
        let all = tests("/nonexistent/a", &["A.1"]);

        assert_eq!(TestRunnerBuilder::default().build(&config).worker_count(&all), 3);

        let mut builder = TestRunnerBuilder::default();
        builder.set_workers(7);
        assert_eq!(builder.build(&config).worker_count(&all), 7);

        let mut builder = TestRunnerBuilder::default();
        builder.set_workers(7).set_parallel_execution(false);
        assert_eq!(builder.build(&config).worker_count(&all), 1);
    }

    #[test]
    fn canceled_runner_runs_nothing() {
        let config = test_config("[settings]\nexit-code-test-case = \"ExitCode\"\n");
        let runner = TestRunnerBuilder::default().build(&config);
        runner.cancel_handle().cancel();

        let reporter = RecordingReporter::default();
        let results = runner.execute(&tests("/nonexistent/a", &["A.1", "A.2"]), &reporter);
        assert_eq!(results, Vec::new());
        assert_eq!(reporter.results(), Vec::new());
    }
}
