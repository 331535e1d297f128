// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ErrorMessageParser;
use crate::{test_case::TestCase, test_result::TestResult};
use camino::Utf8Path;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::{collections::HashMap, io, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Reads the results of a GoogleTest `--gtest_output=xml:<path>` report.
#[derive(Clone, Copy, Debug)]
pub struct XmlResultParser;

impl XmlResultParser {
    /// Returns the results in the report at `path` for the given tests.
    ///
    /// Reports that are missing or malformed produce a warning and whatever results could be
    /// read. Test cases in the report that aren't among `tests` are ignored.
    pub fn results(path: &Utf8Path, tests: &[Arc<TestCase>]) -> Vec<TestResult> {
        match std::fs::read_to_string(path) {
            Ok(xml) => Self::parse_str(&xml, path, tests),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                warn!("{path}: output file does not exist, did your tests crash?");
                Vec::new()
            }
            Err(error) => {
                warn!("{path}: could not read test results: {error}");
                Vec::new()
            }
        }
    }

    /// Parses a report that was already read. `path` is only used in log messages.
    pub fn parse_str(xml: &str, path: &Utf8Path, tests: &[Arc<TestCase>]) -> Vec<TestResult> {
        let by_name: HashMap<&str, &Arc<TestCase>> = tests
            .iter()
            .map(|test_case| (test_case.fully_qualified_name(), test_case))
            .collect();

        let mut results = Vec::new();
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut suite_depth = 0usize;
        let mut current: Option<XmlTestCase> = None;
        let mut failure: Option<PendingFailure> = None;

        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(error) => {
                    warn!(
                        "{path}: test results could not be read completely, \
                         the test executable has probably crashed: {error}"
                    );
                    break;
                }
            };
            match event {
                Event::Start(start) => match start.name().as_ref() {
                    b"testsuite" => suite_depth += 1,
                    b"testcase" if suite_depth > 0 => current = Some(XmlTestCase::new(&start)),
                    b"failure" if current.is_some() => {
                        failure = Some(PendingFailure {
                            message: attribute(&start, b"message").unwrap_or_default(),
                            text: String::new(),
                        });
                    }
                    b"skipped" => {
                        if let Some(test) = current.as_mut() {
                            test.skipped = true;
                        }
                    }
                    _ => {}
                },
                Event::Empty(start) => match start.name().as_ref() {
                    b"testcase" if suite_depth > 0 => {
                        let test = XmlTestCase::new(&start);
                        results.extend(test.into_result(&by_name, path));
                    }
                    b"failure" => {
                        if let Some(test) = current.as_mut() {
                            test.failures
                                .push(attribute(&start, b"message").unwrap_or_default());
                        }
                    }
                    b"skipped" => {
                        if let Some(test) = current.as_mut() {
                            test.skipped = true;
                        }
                    }
                    _ => {}
                },
                Event::Text(text) => {
                    if let Some(failure) = failure.as_mut() {
                        match text.unescape() {
                            Ok(text) => failure.text.push_str(&text),
                            Err(error) => debug!("{path}: skipping undecodable text: {error}"),
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(failure) = failure.as_mut() {
                        failure.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::End(end) => match end.name().as_ref() {
                    b"testsuite" => suite_depth = suite_depth.saturating_sub(1),
                    b"testcase" => {
                        if let Some(test) = current.take() {
                            results.extend(test.into_result(&by_name, path));
                        }
                    }
                    b"failure" => {
                        if let (Some(failure), Some(test)) = (failure.take(), current.as_mut()) {
                            test.failures.push(failure.into_text());
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        results
    }
}

#[derive(Debug)]
struct PendingFailure {
    message: String,
    text: String,
}

impl PendingFailure {
    // The element text is the full failure; the message attribute is only used without it.
    fn into_text(self) -> String {
        if self.text.is_empty() {
            self.message
        } else {
            self.text
        }
    }
}

fn attribute(start: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    let attribute = start.try_get_attribute(name).ok()??;
    attribute.unescape_value().ok().map(|value| value.into_owned())
}

#[derive(Debug, Default)]
struct XmlTestCase {
    name: String,
    status: Option<String>,
    result: Option<String>,
    time: Option<String>,
    failures: Vec<String>,
    skipped: bool,
}

impl XmlTestCase {
    fn new(start: &BytesStart<'_>) -> Self {
        let class_name = attribute(start, b"classname").unwrap_or_default();
        let name = attribute(start, b"name").unwrap_or_default();
        Self {
            name: format!("{class_name}.{name}"),
            status: attribute(start, b"status"),
            result: attribute(start, b"result"),
            time: attribute(start, b"time"),
            ..Default::default()
        }
    }

    fn into_result(
        self,
        tests: &HashMap<&str, &Arc<TestCase>>,
        path: &Utf8Path,
    ) -> Option<TestResult> {
        let Some(&test_case) = tests.get(self.name.as_str()) else {
            debug!("{path}: ignoring result of unrequested test {}", self.name);
            return None;
        };
        let test_case = test_case.clone();
        let duration = self.duration(path);

        let result = match self.status.as_deref() {
            Some("run") if !self.failures.is_empty() => {
                let parsed = ErrorMessageParser::from_failures(self.failures).parse();
                TestResult::failed(test_case, duration, parsed.message, parsed.stack_trace)
            }
            Some("run") if self.skipped || self.result.as_deref() == Some("skipped") => {
                TestResult::skipped(test_case, duration)
            }
            Some("run") => TestResult::passed(test_case, duration),
            Some("notrun" | "skipped") => TestResult::skipped(test_case, duration),
            other => {
                warn!(
                    "{path}: unknown status {:?} for test {}, ignoring",
                    other.unwrap_or(""),
                    self.name
                );
                return None;
            }
        };
        Some(result)
    }

    fn duration(&self, path: &Utf8Path) -> Duration {
        let Some(time) = self.time.as_deref() else {
            return Duration::ZERO;
        };
        match time.trim().parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => {
                Duration::from_micros((seconds * 1_000_000.0).round() as u64)
            }
            _ => {
                warn!("{path}: invalid time {time:?} for test {}", self.name);
                Duration::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_result::{SHORT_TEST_DURATION, TestOutcome};
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const EXE: &str = "/build/tests";

    fn tests() -> Vec<Arc<TestCase>> {
        ["Suite.Pass", "Suite.Fail", "Suite.Skip", "Suite.Disabled", "Param/Suite.Test/0"]
            .into_iter()
            .map(|name| Arc::new(TestCase::new(name, name, EXE)))
            .collect()
    }

    fn summarize(results: &[TestResult]) -> Vec<(&str, TestOutcome, Duration)> {
        results
            .iter()
            .map(|result| {
                (
                    result.test_case().fully_qualified_name(),
                    result.outcome(),
                    result.duration(),
                )
            })
            .collect()
    }

    const REPORT: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <testsuites tests="6" failures="1" disabled="1" errors="0" time="0.5" name="AllTests">
          <testsuite name="Suite" tests="5" failures="1" disabled="1" skipped="1" errors="0" time="0.4">
            <testcase name="Pass" status="run" result="completed" time="0.25" classname="Suite" />
            <testcase name="Fail" file="/src/suite.cpp" line="18" status="run" result="completed" time="0.003" classname="Suite">
              <failure message="/src/suite.cpp:20&#x0A;Expected: 1" type=""><![CDATA[/src/suite.cpp:20
        Expected equality of these values:
          1
          2]]></failure>
              <failure message="/src/suite.cpp:21&#x0A;Value of: ok" type=""><![CDATA[/src/suite.cpp:21
        Value of: ok]]></failure>
            </testcase>
            <testcase name="Skip" status="run" result="skipped" time="0" classname="Suite">
              <skipped message="/src/suite.cpp:30&#x0A;not here"><![CDATA[/src/suite.cpp:30
        not here]]></skipped>
            </testcase>
            <testcase name="Disabled" status="notrun" result="suppressed" time="0" classname="Suite" />
            <testcase name="Unrequested" status="run" result="completed" time="0" classname="Suite" />
          </testsuite>
          <testsuite name="Param/Suite" tests="1" failures="0" disabled="0" errors="0" time="0.1">
            <testcase name="Test/0" value_param="42" status="run" result="completed" time="0.1" classname="Param/Suite" />
          </testsuite>
        </testsuites>
    "#};

    #[test]
    fn reads_report() {
        let results = XmlResultParser::parse_str(REPORT, Utf8Path::new("out.xml"), &tests());
        assert_eq!(
            summarize(&results),
            vec![
                ("Suite.Pass", TestOutcome::Passed, Duration::from_millis(250)),
                ("Suite.Fail", TestOutcome::Failed, Duration::from_millis(3)),
                ("Suite.Skip", TestOutcome::Skipped, SHORT_TEST_DURATION),
                ("Suite.Disabled", TestOutcome::Skipped, SHORT_TEST_DURATION),
                ("Param/Suite.Test/0", TestOutcome::Passed, Duration::from_millis(100)),
            ]
        );

        let failed = &results[1];
        assert_eq!(
            failed.error_message(),
            Some("#1 - Expected equality of these values:\n  1\n  2\n#2 - Value of: ok")
        );
        assert_eq!(
            failed.error_stack_trace(),
            Some(
                "at #1 - suite.cpp:20 in /src/suite.cpp:line 20\n\
                 at #2 - suite.cpp:21 in /src/suite.cpp:line 21\n"
            )
        );
    }

    #[test]
    fn failure_message_attribute_is_a_fallback() {
        let xml = indoc! {r#"
            <testsuites>
              <testsuite name="Suite">
                <testcase name="Fail" status="run" time="0.002" classname="Suite">
                  <failure message="/src/suite.cpp:9&#x0A;boom" type="" />
                </testcase>
              </testsuite>
            </testsuites>
        "#};
        let results = XmlResultParser::parse_str(xml, Utf8Path::new("out.xml"), &tests());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error_message(), Some("boom"));
    }

    #[test]
    fn truncated_report_keeps_earlier_results() {
        let truncated = &REPORT[..REPORT.find("<testcase name=\"Skip\"").expect("skip test")];
        let mut truncated = truncated.to_owned();
        truncated.push_str("<testcase name=\"Skip\" status=\"run\" </broken>");
        let results = XmlResultParser::parse_str(&truncated, Utf8Path::new("out.xml"), &tests());
        let names: Vec<_> = results
            .iter()
            .map(|result| result.test_case().fully_qualified_name())
            .collect();
        assert_eq!(names, vec!["Suite.Pass", "Suite.Fail"]);
    }

    #[test]
    fn unknown_status_is_ignored() {
        let xml = indoc! {r#"
            <testsuites>
              <testsuite name="Suite">
                <testcase name="Pass" status="exploded" time="0" classname="Suite" />
              </testsuite>
            </testsuites>
        "#};
        let results = XmlResultParser::parse_str(xml, Utf8Path::new("out.xml"), &tests());
        assert_eq!(results, Vec::new());
    }

    #[test]
    fn missing_file() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let results = XmlResultParser::results(&dir.path().join("missing.xml"), &tests());
        assert_eq!(results, Vec::new());
    }

    #[test]
    fn reads_file() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("out.xml");
        std::fs::write(&path, REPORT).expect("wrote report");
        assert_eq!(XmlResultParser::results(&path, &tests()).len(), 5);
    }
}
