// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::test_result::stack_trace_entry;
use regex::{Captures, Regex};
use std::sync::LazyLock;

// A file path starts with a drive letter or '/' and stops at control characters and characters
// that are invalid in paths.
const FILE: &str = r#"((?:[a-z]:|/)[^\x00-\x1f"<>|]*)"#;
const ERROR: &str = r"(?:error: |Failure\n)";

static SPLIT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i){}:? {ERROR}", file_and_line()))
        .expect("failure split regex is valid")
});
static PARSE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i)^{}(?::? {ERROR})?", file_and_line()))
        .expect("failure parse regex is valid")
});
static SCOPED_TRACE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i){FILE}(?:\((?P<line1>[0-9]+)\)|:(?P<line2>[0-9]+)): (?P<message>.*)"
    ))
    .expect("scoped trace regex is valid")
});
static SCOPED_TRACE_START_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Google Test trace:\s*").expect("scoped trace start regex is valid")
});
static CALL_STACK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\A(.*)[\r\n]+call stack:\s*(.*)\z").expect("call stack regex is valid")
});

fn file_and_line() -> String {
    format!(r"{FILE}(?::(?P<line1>[0-9]+)|\((?P<line2>[0-9]+)\):)")
}

fn line_number<'a>(captures: &Captures<'a>) -> &'a str {
    captures
        .name("line1")
        .or_else(|| captures.name("line2"))
        .map_or("", |m| m.as_str())
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// An error message and stack trace extracted from test output.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParsedError {
    /// The error message, with failure locations removed.
    pub message: String,

    /// Stack frames in the form `at <label> in <file>:line <line>`, one per line.
    pub stack_trace: String,
}

/// Turns GoogleTest failure output into an error message and a stack trace.
///
/// Console output is split at failure locations such as `/src/a.cpp:42: error: ` or
/// `C:\src\a.cpp(42): error: `. Each failure location becomes a stack frame and is removed from
/// the message. Output before the first failure is kept at the start of the message.
#[derive(Clone, Debug)]
pub struct ErrorMessageParser {
    failures: Vec<String>,
    output_before_first_failure: String,
}

impl ErrorMessageParser {
    /// Creates a parser for the console output of a single test.
    pub fn from_console_output(output: &str) -> Self {
        let mut parser = Self {
            failures: Vec::new(),
            output_before_first_failure: String::new(),
        };
        if output.is_empty() {
            return parser;
        }

        let starts: Vec<usize> = SPLIT_REGEX.find_iter(output).map(|m| m.start()).collect();
        let Some(&first) = starts.first() else {
            parser.failures.push(output.to_owned());
            return parser;
        };
        parser.output_before_first_failure = output[..first].to_owned();
        let ends = starts.iter().skip(1).copied().chain(std::iter::once(output.len()));
        parser.failures = starts
            .iter()
            .zip(ends)
            .map(|(&start, end)| output[start..end].to_owned())
            .collect();
        parser
    }

    /// Creates a parser for failures that are already separated, such as the `failure` elements
    /// of an XML report.
    pub fn from_failures(failures: Vec<String>) -> Self {
        Self {
            failures,
            output_before_first_failure: String::new(),
        }
    }

    /// Builds the error message and the stack trace.
    pub fn parse(self) -> ParsedError {
        let mut parsed = match self.failures.as_slice() {
            [] => ParsedError::default(),
            [failure] => parse_failure(failure, None),
            failures => {
                let mut messages = Vec::with_capacity(failures.len());
                let mut stack_trace = String::new();
                for (index, failure) in failures.iter().enumerate() {
                    let id = index + 1;
                    let parsed = parse_failure(failure, Some(id));
                    messages.push(format!("#{id} - {}", parsed.message));
                    stack_trace.push_str(&parsed.stack_trace);
                }
                ParsedError {
                    message: messages.join("\n"),
                    stack_trace,
                }
            }
        };

        let mut prefix = self.output_before_first_failure;
        if !prefix.is_empty() {
            if !prefix.ends_with('\n') {
                prefix.push('\n');
            }
            parsed.message.insert_str(0, &prefix);
        }
        parsed
    }
}

fn parse_failure(failure: &str, id: Option<usize>) -> ParsedError {
    // Some frameworks report "<message>\ncall stack:\n<file>(<line>): <frame>" lines.
    if let Some(captures) = CALL_STACK_REGEX.captures(failure) {
        let stack_trace = SCOPED_TRACE_REGEX
            .captures_iter(&captures[2])
            .map(|frame| stack_trace_entry(frame["message"].trim(), &frame[1], line_number(&frame)))
            .collect();
        return ParsedError {
            message: captures[1].trim().to_owned(),
            stack_trace,
        };
    }

    let Some(captures) = PARSE_REGEX.captures(failure) else {
        return ParsedError {
            message: failure.to_owned(),
            stack_trace: String::new(),
        };
    };
    let full_path = &captures[1];
    let line = line_number(&captures);
    let reference = id.map(|id| format!("#{id} - ")).unwrap_or_default();
    let label = format!("{reference}{}:{line}", file_name(full_path));
    let mut stack_trace = stack_trace_entry(&label, full_path, line);
    let mut message = failure.replace(&captures[0], "").trim().to_owned();

    if let Some(start) = SCOPED_TRACE_START_REGEX.find(&message) {
        for frame in SCOPED_TRACE_REGEX.captures_iter(&message[start.end()..]) {
            let label = format!("-->{}", frame["message"].trim());
            stack_trace.push_str(&stack_trace_entry(&label, &frame[1], line_number(&frame)));
        }
        message = message[..start.start()].trim().to_owned();
    }

    ParsedError {
        message,
        stack_trace,
    }
}
