// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use gtest_runner::{
    reporter::Reporter,
    test_case::TestCase,
    test_result::{TestOutcome, TestResult},
};
use owo_colors::{OwoColorize, Style, style};
use std::{
    io::{self, Write},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use swrite::{SWrite, swrite};

/// Counts of results by outcome.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct RunStats {
    pub(crate) started: usize,
    pub(crate) passed: usize,
    pub(crate) failed: usize,
    pub(crate) skipped: usize,
    pub(crate) not_found: usize,
}

impl RunStats {
    pub(crate) fn finished(&self) -> usize {
        self.passed + self.failed + self.skipped + self.not_found
    }

    pub(crate) fn is_success(&self) -> bool {
        self.failed == 0 && self.not_found == 0
    }

    fn record(&mut self, outcome: TestOutcome) {
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed => self.failed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::NotFound => self.not_found += 1,
        }
    }
}

#[derive(Debug, Default)]
struct Styles {
    pass: Style,
    fail: Style,
    skip: Style,
    count: Style,
    test_name: Style,
    message: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = style().green().bold();
        self.fail = style().red().bold();
        self.skip = style().yellow().bold();
        self.count = style().bold();
        self.test_name = style().blue().bold();
        self.message = style().dimmed();
    }
}

struct ConsoleState<W> {
    writer: W,
    stats: RunStats,
    results: Vec<TestResult>,
}

/// Prints one line per result and a summary at the end.
///
/// Workers report concurrently; a mutex keeps lines whole. Results are also kept for the JUnit
/// report.
pub(crate) struct ConsoleReporter<W> {
    styles: Styles,
    verbose: bool,
    state: Mutex<ConsoleState<W>>,
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub(crate) fn new(writer: W, verbose: bool) -> Self {
        Self {
            styles: Styles::default(),
            verbose,
            state: Mutex::new(ConsoleState {
                writer,
                stats: RunStats::default(),
                results: Vec::new(),
            }),
        }
    }

    pub(crate) fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Writes the final summary line and returns the collected results.
    pub(crate) fn finish(self, elapsed: Duration) -> io::Result<(RunStats, Vec<TestResult>)> {
        let mut state = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let stats = state.stats;

        let mut summary = format!(
            "     Summary [{:>8.3}s] {} tests run: {} {}",
            elapsed.as_secs_f64(),
            stats.finished().style(self.styles.count),
            stats.passed.style(self.styles.count),
            "passed".style(self.styles.pass),
        );
        if stats.failed > 0 {
            swrite!(
                summary,
                ", {} {}",
                stats.failed.style(self.styles.count),
                "failed".style(self.styles.fail)
            );
        }
        if stats.not_found > 0 {
            swrite!(
                summary,
                ", {} {}",
                stats.not_found.style(self.styles.count),
                "not found".style(self.styles.fail)
            );
        }
        if stats.skipped > 0 {
            swrite!(
                summary,
                ", {} {}",
                stats.skipped.style(self.styles.count),
                "skipped".style(self.styles.skip)
            );
        }
        writeln!(state.writer, "{summary}")?;
        state.writer.flush()?;

        Ok((stats, state.results))
    }

    fn state(&self) -> MutexGuard<'_, ConsoleState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_result(&self, writer: &mut W, result: &TestResult) -> io::Result<()> {
        let (label, label_style) = match result.outcome() {
            TestOutcome::Passed => ("PASS", self.styles.pass),
            TestOutcome::Failed => ("FAIL", self.styles.fail),
            TestOutcome::Skipped => ("SKIP", self.styles.skip),
            TestOutcome::NotFound => ("NOT FOUND", self.styles.fail),
        };
        writeln!(
            writer,
            "{:>12} [{:>8.3}s] {}",
            label.style(label_style),
            result.duration().as_secs_f64(),
            result.test_case().display_name().style(self.styles.test_name),
        )?;

        let show_details = self.verbose
            || matches!(
                result.outcome(),
                TestOutcome::Failed | TestOutcome::NotFound
            );
        if !show_details {
            return Ok(());
        }
        if let Some(message) = result.error_message() {
            for line in message.lines() {
                writeln!(writer, "             {}", line.style(self.styles.message))?;
            }
        }
        if let Some(stack_trace) = result.error_stack_trace() {
            for line in stack_trace.lines() {
                writeln!(writer, "             {}", line.style(self.styles.message))?;
            }
        }
        Ok(())
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn report_tests_started(&self, tests: &[Arc<TestCase>]) {
        let mut state = self.state();
        state.stats.started += tests.len();
        if self.verbose {
            for test_case in tests {
                // Output errors resurface when the summary is written.
                let _ = writeln!(
                    state.writer,
                    "{:>12} {}",
                    "START".style(self.styles.count),
                    test_case.display_name().style(self.styles.test_name)
                );
            }
        }
    }

    fn report_test_results(&self, results: &[TestResult]) {
        let mut state = self.state();
        let ConsoleState {
            writer,
            stats,
            results: collected,
        } = &mut *state;
        for result in results {
            stats.record(result.outcome());
            let _ = self.write_result(writer, result);
        }
        let _ = writer.flush();
        collected.extend_from_slice(results);
    }
}
