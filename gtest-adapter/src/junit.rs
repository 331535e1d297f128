// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::ExpectedError;
use camino::Utf8Path;
use gtest_runner::test_result::{TestOutcome, TestResult};
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::{collections::BTreeMap, fs::File, time::Duration};

static REPORT_NAME: &str = "gtest-adapter-run";

/// Builds a JUnit report with one test suite per executable.
pub(crate) fn junit_report(results: &[TestResult], elapsed: Duration) -> Report {
    let mut by_executable: BTreeMap<&Utf8Path, Vec<&TestResult>> = BTreeMap::new();
    for result in results {
        by_executable
            .entry(result.test_case().executable())
            .or_default()
            .push(result);
    }

    let mut report = Report::new(REPORT_NAME);
    report.set_time(elapsed);
    report.add_test_suites(by_executable.into_iter().map(|(executable, mut results)| {
        results.sort_by(|a, b| {
            a.test_case()
                .fully_qualified_name()
                .cmp(b.test_case().fully_qualified_name())
        });
        let mut test_suite = TestSuite::new(executable.as_str());
        test_suite.add_test_cases(results.into_iter().map(junit_test_case));
        test_suite
    }));
    report
}

fn junit_test_case(result: &TestResult) -> TestCase {
    let mut status = match result.outcome() {
        TestOutcome::Passed => TestCaseStatus::success(),
        TestOutcome::Skipped => TestCaseStatus::skipped(),
        TestOutcome::Failed => {
            let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
            status.set_type("test failure");
            status
        }
        TestOutcome::NotFound => {
            let mut status = TestCaseStatus::non_success(NonSuccessKind::Error);
            status.set_type("test not found");
            status
        }
    };
    if let Some(message) = result.error_message() {
        // The first line is the summary; the full message goes into the description.
        status.set_message(message.lines().next().unwrap_or_default());
        status.set_description(message);
    }

    let test_case = result.test_case();
    let mut junit_case = TestCase::new(test_case.display_name(), status);
    junit_case
        .set_classname(test_case.suite())
        .set_time(result.duration());
    if let Some(stack_trace) = result.error_stack_trace() {
        junit_case.set_system_out(stack_trace);
    }
    junit_case
}

/// Writes `report` to `path`, creating parent directories.
pub(crate) fn write_junit(report: &Report, path: &Utf8Path) -> Result<(), ExpectedError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| ExpectedError::junit_write_error(parent, err))?;
        }
    }
    let file = File::create(path).map_err(|err| ExpectedError::junit_write_error(path, err))?;
    report
        .serialize(file)
        .map_err(|err| ExpectedError::junit_serialize_error(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use gtest_runner::test_case::TestCase as GtestTestCase;
    use std::sync::Arc;

    fn results() -> Vec<TestResult> {
        let case = |name: &str, exe: &str| Arc::new(GtestTestCase::new(name, name, exe));
        vec![
            TestResult::failed(
                case("Suite.Fails", "/build/b"),
                Duration::from_millis(5),
                "Value of: x\nExpected: 1",
                "at a.cpp:3 in a.cpp:line 3\n",
            ),
            TestResult::passed(case("Suite.Passes", "/build/a"), Duration::from_millis(20)),
            TestResult::skipped(case("Suite.Later", "/build/b"), Duration::ZERO),
            TestResult::not_found(case("Suite.Gone", "/build/a")),
        ]
    }

    #[test]
    fn suites_per_executable() {
        let report = junit_report(&results(), Duration::from_secs(2));
        assert_eq!(report.tests, 4);
        assert_eq!(report.failures, 1);
        assert_eq!(report.errors, 1);

        let suites: Vec<_> = report
            .test_suites
            .iter()
            .map(|suite| suite.name.as_str().to_owned())
            .collect();
        assert_eq!(suites, vec!["/build/a", "/build/b"]);

        let xml = report.to_string().expect("serializes");
        assert!(xml.contains(r#"classname="Suite""#), "{xml}");
        assert!(xml.contains(r#"message="Value of: x""#), "{xml}");
        assert!(xml.contains("test not found"), "{xml}");
    }

    #[test]
    fn writes_report_file() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let path = dir.path().join("reports/junit.xml");
        write_junit(&junit_report(&results(), Duration::ZERO), &path).expect("written");

        let xml = std::fs::read_to_string(&path).expect("readable");
        assert!(xml.starts_with("<?xml"), "{xml}");
        assert!(xml.contains(r#"<testsuite name="/build/b""#), "{xml}");
    }
}
