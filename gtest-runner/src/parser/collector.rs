// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::XmlResultParser;
use crate::{
    test_case::TestCase,
    test_result::{TestResult, stack_trace_entry_for},
};
use camino::Utf8Path;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Combines the results of one test process invocation.
#[derive(Clone, Copy, Debug)]
pub struct TestResultCollector;

impl TestResultCollector {
    /// Returns a result for each of `tests` that has one.
    ///
    /// Results from the XML report at `xml_path` take precedence. Console results fill in the
    /// tests the report doesn't mention. If `crashed_test` is set, every test still without a
    /// result is reported as skipped because of the crash; otherwise such tests are only
    /// logged.
    pub fn collect_results(
        tests: &[Arc<TestCase>],
        xml_path: &Utf8Path,
        console_results: &[TestResult],
        crashed_test: Option<&Arc<TestCase>>,
    ) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(tests.len());
        let mut resolved = HashSet::new();

        if xml_path.exists() || crashed_test.is_none() {
            for result in XmlResultParser::results(xml_path, tests) {
                if resolved.insert(result.test_case().fully_qualified_name().to_owned()) {
                    results.push(result);
                }
            }
        } else {
            debug!("{xml_path}: not reading results, the test executable crashed");
        }

        for result in console_results {
            if resolved.insert(result.test_case().fully_qualified_name().to_owned()) {
                results.push(result.clone());
            }
        }

        let remaining: Vec<_> = tests
            .iter()
            .filter(|test_case| !resolved.contains(test_case.fully_qualified_name()))
            .collect();
        if remaining.is_empty() {
            return results;
        }

        match crashed_test {
            Some(crashed) => {
                let message = format!(
                    "reason is probably a crash of test {}",
                    crashed.display_name()
                );
                let stack_trace = stack_trace_entry_for("crash suspect", crashed);
                results.extend(remaining.into_iter().map(|test_case| {
                    TestResult::skipped(test_case.clone(), Duration::ZERO)
                        .with_error(message.as_str(), stack_trace.as_str())
                }));
            }
            None => {
                warn!(
                    "{} tests were not run, although they were requested",
                    remaining.len()
                );
                for test_case in remaining {
                    debug!("not run: {}", test_case.display_name());
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::StreamingResultParser,
        test_result::TestOutcome,
    };
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const EXE: &str = "/build/tests";

    fn tests(names: &[&str]) -> Vec<Arc<TestCase>> {
        names
            .iter()
            .map(|name| {
                Arc::new(TestCase::new(*name, *name, EXE).with_location("/src/suite.cpp", 40))
            })
            .collect()
    }

    fn outcomes(results: &[TestResult]) -> Vec<(&str, TestOutcome)> {
        results
            .iter()
            .map(|result| (result.test_case().fully_qualified_name(), result.outcome()))
            .collect()
    }

    #[test]
    fn crash_skips_remaining_tests() {
        let tests = tests(&["Suite.Pass", "Suite.CrashTest", "Suite.After"]);
        let mut parser = StreamingResultParser::new(EXE, &tests);
        parser.parse_all(
            indoc! {"
                [ RUN      ] Suite.Pass
                [       OK ] Suite.Pass (1 ms)
                [ RUN      ] Suite.CrashTest
            "}
            .lines(),
        );

        let dir = Utf8TempDir::new().expect("created temp dir");
        let results = TestResultCollector::collect_results(
            &tests,
            &dir.path().join("missing.xml"),
            parser.results(),
            parser.crashed_test(),
        );
        assert_eq!(
            outcomes(&results),
            vec![
                ("Suite.Pass", TestOutcome::Passed),
                ("Suite.CrashTest", TestOutcome::Failed),
                ("Suite.After", TestOutcome::Skipped),
            ]
        );
        assert_eq!(
            results[2].error_message(),
            Some("reason is probably a crash of test Suite.CrashTest")
        );
        assert_eq!(
            results[2].error_stack_trace(),
            Some("at crash suspect in /src/suite.cpp:line 40\n")
        );
    }

    #[test]
    fn xml_results_take_precedence() {
        let tests = tests(&["Suite.A", "Suite.B", "Suite.C"]);
        let dir = Utf8TempDir::new().expect("created temp dir");
        let xml_path = dir.path().join("out.xml");
        std::fs::write(
            &xml_path,
            indoc! {r#"
                <testsuites>
                  <testsuite name="Suite">
                    <testcase name="A" status="run" time="0.01" classname="Suite" />
                  </testsuite>
                </testsuites>
            "#},
        )
        .expect("wrote report");

        let console = vec![
            TestResult::failed(tests[0].clone(), Duration::from_millis(10), "console", ""),
            TestResult::passed(tests[1].clone(), Duration::from_millis(5)),
        ];
        let results = TestResultCollector::collect_results(&tests, &xml_path, &console, None);
        assert_eq!(
            outcomes(&results),
            vec![("Suite.A", TestOutcome::Passed), ("Suite.B", TestOutcome::Passed)]
        );
    }
}
