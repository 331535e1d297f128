// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test outcomes.

use crate::test_case::TestCase;
use camino::Utf8Path;
use std::{fmt, sync::Arc, time::Duration};

/// Durations shorter than [`MIN_MEASURED_DURATION`] are replaced by this value.
///
/// Hosts render this as "< 1 ms" rather than "0 ms".
pub const SHORT_TEST_DURATION: Duration = Duration::from_micros(100);

/// The resolution of GoogleTest's own timings.
pub const MIN_MEASURED_DURATION: Duration = Duration::from_millis(1);

/// Replaces durations below 1 ms with [`SHORT_TEST_DURATION`].
pub fn normalize_duration(duration: Duration) -> Duration {
    if duration < MIN_MEASURED_DURATION {
        SHORT_TEST_DURATION
    } else {
        duration
    }
}

/// The outcome of a single test.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TestOutcome {
    /// The test passed.
    Passed,

    /// The test failed or crashed.
    Failed,

    /// The test was skipped, either by the test itself or because another test crashed the
    /// process first.
    Skipped,

    /// The test was requested but could not be found.
    NotFound,
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Skipped => "SKIP",
            Self::NotFound => "NOT FOUND",
        };
        // Use pad so that the width specifier is respected.
        f.pad(s)
    }
}

/// The result of running one test once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestResult {
    test_case: Arc<TestCase>,
    outcome: TestOutcome,
    duration: Duration,
    error_message: Option<String>,
    error_stack_trace: Option<String>,
}

impl TestResult {
    fn new(test_case: Arc<TestCase>, outcome: TestOutcome, duration: Duration) -> Self {
        Self {
            test_case,
            outcome,
            duration: normalize_duration(duration),
            error_message: None,
            error_stack_trace: None,
        }
    }

    /// Creates a passed result.
    pub fn passed(test_case: Arc<TestCase>, duration: Duration) -> Self {
        Self::new(test_case, TestOutcome::Passed, duration)
    }

    /// Creates a failed result.
    ///
    /// Empty messages and stack traces are stored as `None`.
    pub fn failed(
        test_case: Arc<TestCase>,
        duration: Duration,
        error_message: impl Into<String>,
        error_stack_trace: impl Into<String>,
    ) -> Self {
        Self::new(test_case, TestOutcome::Failed, duration)
            .with_error(error_message.into(), error_stack_trace.into())
    }

    /// Creates a skipped result.
    pub fn skipped(test_case: Arc<TestCase>, duration: Duration) -> Self {
        Self::new(test_case, TestOutcome::Skipped, duration)
    }

    /// Creates a result for a test that could not be found.
    pub fn not_found(test_case: Arc<TestCase>) -> Self {
        Self::new(test_case, TestOutcome::NotFound, Duration::ZERO)
    }

    /// Attaches an error message and a stack trace.
    pub fn with_error(
        mut self,
        error_message: impl Into<String>,
        error_stack_trace: impl Into<String>,
    ) -> Self {
        let error_message = error_message.into();
        let error_stack_trace = error_stack_trace.into();
        self.error_message = (!error_message.is_empty()).then_some(error_message);
        self.error_stack_trace = (!error_stack_trace.is_empty()).then_some(error_stack_trace);
        self
    }

    /// The test this result is for.
    pub fn test_case(&self) -> &Arc<TestCase> {
        &self.test_case
    }

    /// The outcome.
    pub fn outcome(&self) -> TestOutcome {
        self.outcome
    }

    /// How long the test took, after normalization.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The error message, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// The synthesized stack trace, if any.
    pub fn error_stack_trace(&self) -> Option<&str> {
        self.error_stack_trace.as_deref()
    }
}

/// Formats one stack trace frame the way test hosts expect them.
pub fn stack_trace_entry(label: &str, file: impl AsRef<str>, line: impl fmt::Display) -> String {
    format!("at {label} in {}:line {line}\n", file.as_ref())
}

/// Formats a stack frame pointing at the source location of `test_case`.
pub(crate) fn stack_trace_entry_for(label: &str, test_case: &TestCase) -> String {
    let file = test_case
        .source_file()
        .map_or("", Utf8Path::as_str);
    stack_trace_entry(label, file, test_case.line())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(Duration::ZERO, SHORT_TEST_DURATION; "zero")]
    #[test_case(Duration::from_micros(999), SHORT_TEST_DURATION; "just below a millisecond")]
    #[test_case(Duration::from_millis(1), Duration::from_millis(1); "one millisecond")]
    #[test_case(Duration::from_millis(250), Duration::from_millis(250); "longer")]
    fn durations_are_floored(input: Duration, expected: Duration) {
        assert_eq!(normalize_duration(input), expected);
    }

    #[test]
    fn empty_errors_are_none() {
        let test_case = Arc::new(TestCase::new("A.B", "A.B", "/bin/tests"));
        let result = TestResult::failed(test_case, Duration::ZERO, "", "");
        assert_eq!(result.error_message(), None);
        assert_eq!(result.error_stack_trace(), None);
        assert_eq!(result.duration(), SHORT_TEST_DURATION);
    }

    #[test]
    fn stack_trace_entry_format() {
        assert_eq!(
            stack_trace_entry("main.cpp:12", "C:\\src\\main.cpp", 12),
            "at main.cpp:12 in C:\\src\\main.cpp:line 12\n",
        );
    }
}
