// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ErrorMessageParser;
use crate::{
    test_case::TestCase,
    test_result::{MIN_MEASURED_DURATION, TestResult},
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
    time::Duration,
};
use tracing::{debug, warn};

/// Printed by GoogleTest when a test starts.
pub const RUN_MARKER: &str = "[ RUN      ]";
/// Printed by GoogleTest when a test passes.
pub const PASSED_MARKER: &str = "[       OK ]";
/// Printed by GoogleTest when a test fails.
pub const FAILED_MARKER: &str = "[  FAILED  ]";
/// Printed by GoogleTest when a test skips itself.
pub const SKIPPED_MARKER: &str = "[  SKIPPED ]";

/// The error message of a test that started but never finished.
pub const CRASH_TEXT: &str = "!! This test has probably CRASHED !!";

// Output that doesn't end with a newline ends up in front of the marker.
static PREFIXED_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "^(.+)((?:{}|{}|{}).*)$",
        regex::escape(PASSED_MARKER),
        regex::escape(FAILED_MARKER),
        regex::escape(SKIPPED_MARKER),
    ))
    .expect("prefixed line regex is valid")
});

/// Something the streaming parser noticed while reading a line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseEvent {
    /// A known test started.
    Started(Arc<TestCase>),

    /// A test finished, or was found to have crashed.
    Finished(TestResult),
}

#[derive(Debug)]
struct RunningTest {
    test_case: Arc<TestCase>,
    output: Vec<String>,
}

/// Turns the console output of a GoogleTest process into test results, one line at a time.
///
/// Lines between a `[ RUN      ]` line and its terminal line are the test's output. A test
/// that never reaches its terminal line is reported as crashed.
#[derive(Debug)]
pub struct StreamingResultParser {
    executable: Utf8PathBuf,
    tests: HashMap<String, Arc<TestCase>>,
    current: Option<RunningTest>,
    results: Vec<TestResult>,
    events: Vec<ParseEvent>,
    crashed_test: Option<Arc<TestCase>>,
}

impl StreamingResultParser {
    /// Creates a parser for the output of `executable`, which was asked to run `tests`.
    pub fn new(executable: impl Into<Utf8PathBuf>, tests: &[Arc<TestCase>]) -> Self {
        let mut by_name = HashMap::with_capacity(tests.len());
        for test_case in tests {
            by_name
                .entry(test_case.fully_qualified_name().to_owned())
                .or_insert_with(|| test_case.clone());
        }
        Self {
            executable: executable.into(),
            tests: by_name,
            current: None,
            results: Vec::new(),
            events: Vec::new(),
            crashed_test: None,
        }
    }

    /// Feeds one line of output, without its line terminator.
    pub fn report_line(&mut self, line: &str) {
        match PREFIXED_LINE_REGEX.captures(line) {
            Some(captures) => {
                self.handle_line(&captures[1]);
                self.handle_line(&captures[2]);
            }
            None => self.handle_line(line),
        }
    }

    /// Signals the end of the output. A test that is still running has crashed.
    pub fn flush(&mut self) {
        if let Some(running) = self.current.take() {
            self.finish_crashed(running);
        }
    }

    /// Feeds every line of a buffered output, then flushes.
    pub fn parse_all<S: AsRef<str>>(&mut self, lines: impl IntoIterator<Item = S>) {
        for line in lines {
            self.report_line(line.as_ref());
        }
        self.flush();
    }

    /// The results found so far, in output order.
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// The test that crashed, if any.
    pub fn crashed_test(&self) -> Option<&Arc<TestCase>> {
        self.crashed_test.as_ref()
    }

    /// Returns the events found since the last call.
    pub fn take_events(&mut self) -> Vec<ParseEvent> {
        std::mem::take(&mut self.events)
    }

    /// The executable whose output this is.
    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    fn handle_line(&mut self, line: &str) {
        if let Some(name) = line.strip_prefix(RUN_MARKER) {
            if let Some(running) = self.current.take() {
                self.finish_crashed(running);
            }
            self.start(name.trim());
            return;
        }

        let Some(mut running) = self.current.take() else {
            return;
        };
        let result = if line.starts_with(PASSED_MARKER) {
            TestResult::passed(running.test_case, self.parse_duration(line))
        } else if line.starts_with(FAILED_MARKER) {
            let parsed = ErrorMessageParser::from_console_output(&joined(&running.output)).parse();
            TestResult::failed(
                running.test_case,
                self.parse_duration(line),
                parsed.message,
                parsed.stack_trace,
            )
        } else if line.starts_with(SKIPPED_MARKER) {
            let reason = joined(&running.output);
            TestResult::skipped(running.test_case, self.parse_duration(line))
                .with_error(reason.trim(), "")
        } else {
            running.output.push(line.to_owned());
            self.current = Some(running);
            return;
        };
        self.finish(result);
    }

    fn start(&mut self, name: &str) {
        match self.tests.get(name) {
            Some(test_case) => {
                self.events.push(ParseEvent::Started(test_case.clone()));
                self.current = Some(RunningTest {
                    test_case: test_case.clone(),
                    output: Vec::new(),
                });
            }
            None => {
                warn!(
                    "{}: output contains a test that was not requested, ignoring: {name}",
                    self.executable
                );
            }
        }
    }

    fn finish_crashed(&mut self, running: RunningTest) {
        let mut message = CRASH_TEXT.to_owned();
        if !running.output.is_empty() {
            message.push_str("\nTest output:\n\n");
            message.push_str(&joined(&running.output));
        }
        debug!(
            "{}: test {} crashed",
            self.executable,
            running.test_case.display_name()
        );
        self.crashed_test = Some(running.test_case.clone());
        self.finish(TestResult::failed(
            running.test_case,
            Duration::ZERO,
            message,
            "",
        ));
    }

    fn finish(&mut self, result: TestResult) {
        self.events.push(ParseEvent::Finished(result.clone()));
        self.results.push(result);
    }

    fn parse_duration(&self, line: &str) -> Duration {
        match parse_duration(line) {
            Some(duration) => duration,
            None => {
                warn!(
                    "{}: could not parse duration in line '{line}', assuming 1 ms",
                    self.executable
                );
                MIN_MEASURED_DURATION
            }
        }
    }
}

fn joined(lines: &[String]) -> String {
    lines.iter().fold(String::new(), |mut acc, line| {
        acc.push_str(line);
        acc.push('\n');
        acc
    })
}

/// Parses the `(N ms)` suffix of a terminal line.
fn parse_duration(line: &str) -> Option<Duration> {
    let (_, suffix) = line.rsplit_once('(')?;
    let millis = suffix
        .trim_end()
        .trim_end_matches(')')
        .replace("ms", "")
        .replace(',', "");
    millis.trim().parse().ok().map(Duration::from_millis)
}
