// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting test progress to the host.
//!
//! The host implements [`Reporter`]. Workers call it concurrently, so implementations must be
//! `Send + Sync` and serialize calls themselves.

use crate::{
    config::GtestConfig,
    test_case::TestCase,
    test_result::TestResult,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::debug;

/// Receives test progress.
pub trait Reporter: Send + Sync {
    /// Called when tests start running.
    fn report_tests_started(&self, tests: &[Arc<TestCase>]);

    /// Called when results are available.
    fn report_test_results(&self, results: &[TestResult]);
}

impl<R: Reporter + ?Sized> Reporter for &R {
    fn report_tests_started(&self, tests: &[Arc<TestCase>]) {
        (**self).report_tests_started(tests);
    }

    fn report_test_results(&self, results: &[TestResult]) {
        (**self).report_test_results(results);
    }
}

/// Written by a test executable to add a line to its exit-code test's message.
pub const EXIT_CODE_OUTPUT_PREFIX: &str = "GTA_EXIT_CODE_OUTPUT ";

/// Written by a test executable to mark its exit-code test as skipped.
pub const EXIT_CODE_SKIP_LINE: &str = "GTA_EXIT_CODE_SKIP";

/// The exit code and exit-code output of one test process invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutableResult {
    /// The executable that was run.
    pub executable: Utf8PathBuf,

    /// The exit code. Processes killed by a signal report -1.
    pub exit_code: i32,

    /// Lines the executable wrote with [`EXIT_CODE_OUTPUT_PREFIX`], without the prefix.
    pub exit_code_output: Vec<String>,

    /// Whether the executable wrote [`EXIT_CODE_SKIP_LINE`].
    pub exit_code_skip: bool,
}

impl ExecutableResult {
    /// Creates a result with exit code 0 and no output.
    pub fn new(executable: impl Into<Utf8PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            exit_code: 0,
            exit_code_output: Vec::new(),
            exit_code_skip: false,
        }
    }

    /// Records an output line if it is an exit-code line. Returns true if it was.
    pub fn observe_line(&mut self, line: &str) -> bool {
        if let Some(output) = line.strip_prefix(EXIT_CODE_OUTPUT_PREFIX) {
            self.exit_code_output.push(output.to_owned());
            true
        } else if line.trim_end() == EXIT_CODE_SKIP_LINE {
            self.exit_code_skip = true;
            true
        } else {
            false
        }
    }

    /// Combines the results of all invocations of the same executable.
    ///
    /// The exit code with the largest absolute value wins. Output is joined with an empty line
    /// between invocations. The aggregate is skipped only if every invocation was.
    pub fn aggregate(results: &[ExecutableResult]) -> Vec<ExecutableResult> {
        let mut by_executable: BTreeMap<&Utf8Path, Vec<&ExecutableResult>> = BTreeMap::new();
        for result in results {
            by_executable
                .entry(&result.executable)
                .or_default()
                .push(result);
        }

        by_executable
            .into_iter()
            .map(|(executable, results)| {
                let min = results.iter().map(|r| r.exit_code).min().unwrap_or(0);
                let max = results.iter().map(|r| r.exit_code).max().unwrap_or(0);
                let exit_code = if max.unsigned_abs() > min.unsigned_abs() {
                    max
                } else {
                    min
                };

                let mut exit_code_output = Vec::new();
                for result in &results {
                    if result.exit_code_output.iter().any(|line| !line.trim().is_empty()) {
                        if !exit_code_output.is_empty() {
                            exit_code_output.push(String::new());
                        }
                        exit_code_output.extend(result.exit_code_output.iter().cloned());
                    }
                }

                ExecutableResult {
                    executable: executable.to_owned(),
                    exit_code,
                    exit_code_output,
                    exit_code_skip: results.iter().all(|r| r.exit_code_skip),
                }
            })
            .collect()
    }
}

/// Reports the exit-code test of each executable that has one configured.
pub struct ExitCodeTestsReporter<'a> {
    reporter: &'a dyn Reporter,
    config: &'a GtestConfig,
}

impl<'a> ExitCodeTestsReporter<'a> {
    /// Creates a new reporter.
    pub fn new(reporter: &'a dyn Reporter, config: &'a GtestConfig) -> Self {
        Self { reporter, config }
    }

    /// Aggregates `results` per executable and reports one exit-code test for each.
    pub fn report_exit_code_test_cases(&self, results: &[ExecutableResult]) {
        for result in ExecutableResult::aggregate(results) {
            let settings = self.config.settings_for(&result.executable);
            let Some(test_name) = settings.exit_code_test_name() else {
                continue;
            };
            let test_case = Arc::new(TestCase::exit_code_test(&result.executable, test_name));
            debug!(
                "reporting exit code {} as {}",
                result.exit_code,
                test_case.display_name()
            );
            self.reporter
                .report_tests_started(std::slice::from_ref(&test_case));
            self.reporter
                .report_test_results(&[exit_code_test_result(test_case, &result)]);
        }
    }
}

fn exit_code_test_result(test_case: Arc<TestCase>, result: &ExecutableResult) -> TestResult {
    let output = result.exit_code_output.join("\n");
    if result.exit_code != 0 {
        let mut message = format!("Exit code: {}", result.exit_code);
        if !output.is_empty() {
            message.push_str("\n\n");
            message.push_str(&output);
        }
        return TestResult::failed(test_case, Duration::ZERO, message, "");
    }
    if result.exit_code_skip {
        TestResult::skipped(test_case, Duration::ZERO).with_error(output, "")
    } else {
        TestResult::passed(test_case, Duration::ZERO).with_error(output, "")
    }
}
