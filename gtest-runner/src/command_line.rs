// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Planning the command lines of a test run.
//!
//! GoogleTest selects tests through `--gtest_filter`, and the filter has to fit on a single
//! command line. [`CommandLineScheduler::plan`] splits a request into as many invocations as
//! needed, preferring `Suite.*` patterns for suites that are run completely.

use crate::{
    config::ExecutableSettings, errors::PlanError, list::split_user_params, test_case::TestCase,
};
use camino::Utf8Path;
use indexmap::IndexMap;
use std::{collections::HashSet, sync::Arc};
use swrite::{SWrite, swrite};
use tracing::debug;

/// The longest command line, including the executable, that is ever planned.
pub const MAX_COMMAND_LENGTH: usize = 8191;

/// Precedes the filter in the command line.
pub const FILTER_OPTION: &str = " --gtest_filter=";

/// A filter that matches no test, used to run an executable only for its exit code.
pub const NOT_EXISTING_DUMMY_TEST_CASE: &str = "GTA_NOT_EXISTING_DUMMY_TEST_CASE";

/// One planned run of a test executable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandLineInvocation {
    test_cases: Vec<Arc<TestCase>>,
    command_line: String,
    args: Vec<String>,
}

impl CommandLineInvocation {
    /// The tests this invocation runs.
    pub fn test_cases(&self) -> &[Arc<TestCase>] {
        &self.test_cases
    }

    /// The arguments as a single string, excluding the executable.
    ///
    /// This is the string the length budget applies to.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// The arguments to pass to the executable.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Plans [`CommandLineInvocation`]s for the tests of one executable.
#[derive(Clone, Copy, Debug)]
pub struct CommandLineScheduler<'a> {
    settings: &'a ExecutableSettings,
}

impl<'a> CommandLineScheduler<'a> {
    /// Creates a scheduler using the flags in `settings`.
    pub fn new(settings: &'a ExecutableSettings) -> Self {
        Self { settings }
    }

    /// Plans the invocations that together run exactly `tests`.
    ///
    /// `executable_len` is the length of the executable path as it appears on the command line.
    /// Every returned command line, plus `executable_len` plus one separating space, is at most
    /// [`MAX_COMMAND_LENGTH`] characters long.
    pub fn plan(
        &self,
        tests: &[Arc<TestCase>],
        executable_len: usize,
        user_params: &str,
        result_xml_path: &Utf8Path,
    ) -> Result<Vec<CommandLineInvocation>, PlanError> {
        let base = self.base_arguments(result_xml_path);
        let builder = InvocationBuilder {
            base,
            user_params: user_params.trim(),
        };

        let mut seen = HashSet::new();
        let (exit_code_tests, tests): (Vec<_>, Vec<_>) = tests
            .iter()
            .filter(|test_case| seen.insert(test_case.fully_qualified_name()))
            .cloned()
            .partition(|test_case| test_case.is_exit_code_test());

        if tests.is_empty() && !exit_code_tests.is_empty() {
            debug!("only the exit-code test was requested, running no tests");
            return Ok(vec![
                builder.build(Vec::new(), Some(NOT_EXISTING_DUMMY_TEST_CASE)),
            ]);
        }
        if tests.is_empty() || tests.len() == tests[0].metadata().tests_in_executable {
            return Ok(vec![builder.build(tests, None)]);
        }

        let mut suites: IndexMap<&str, Vec<Arc<TestCase>>> = IndexMap::new();
        for test_case in &tests {
            suites
                .entry(test_case.suite())
                .or_default()
                .push(Arc::clone(test_case));
        }
        let (full_suites, partial_suites): (Vec<_>, Vec<_>) = suites
            .into_iter()
            .partition(|(_, tests)| tests.len() == tests[0].metadata().tests_in_suite);

        let budget = MAX_COMMAND_LENGTH.saturating_sub(
            builder.base.command_line.len()
                + FILTER_OPTION.len()
                + executable_len
                + builder.user_params_len()
                + 1,
        );
        let mut packer = FilterPacker::new(budget);
        for (suite, tests) in full_suites {
            if FilterSegment::Suite(suite).len() <= budget {
                packer.push(FilterSegment::Suite(suite), tests)?;
                continue;
            }
            debug!("pattern for suite {suite} exceeds the filter budget, listing its tests");
            for test_case in tests {
                packer.push(FilterSegment::Test(test_case.filter_name()), vec![test_case.clone()])?;
            }
        }
        for test_case in partial_suites.into_iter().flat_map(|(_, tests)| tests) {
            packer.push(FilterSegment::Test(test_case.filter_name()), vec![test_case.clone()])?;
        }

        let invocations: Vec<_> = packer
            .finish()
            .into_iter()
            .map(|group| builder.build(group.tests, Some(&group.filter)))
            .collect();
        debug!(
            "planned {} invocations for {} tests with a filter budget of {budget}",
            invocations.len(),
            tests.len()
        );
        Ok(invocations)
    }

    fn base_arguments(&self, result_xml_path: &Utf8Path) -> BaseArguments {
        let settings = self.settings;
        let mut base = BaseArguments::default();
        base.push(
            format!("--gtest_output=\"xml:{result_xml_path}\""),
            format!("--gtest_output=xml:{result_xml_path}"),
        );
        base.push_flag(format!(
            "--gtest_catch_exceptions={}",
            u8::from(settings.catch_exceptions)
        ));
        base.push_flag(format!(
            "--gtest_break_on_failure={}",
            u8::from(settings.break_on_failure)
        ));
        if settings.run_disabled_tests {
            base.push_flag("--gtest_also_run_disabled_tests".to_owned());
        }
        if settings.shuffle_tests {
            base.push_flag("--gtest_shuffle".to_owned());
            if settings.shuffle_seed != 0 {
                base.push_flag(format!("--gtest_random_seed={}", settings.shuffle_seed));
            }
        }
        if settings.repetitions != 1 {
            base.push_flag(format!("--gtest_repeat={}", settings.repetitions));
        }
        base
    }
}

#[derive(Clone, Debug, Default)]
struct BaseArguments {
    command_line: String,
    args: Vec<String>,
}

impl BaseArguments {
    fn push(&mut self, display: String, arg: String) {
        if !self.command_line.is_empty() {
            self.command_line.push(' ');
        }
        self.command_line.push_str(&display);
        self.args.push(arg);
    }

    fn push_flag(&mut self, flag: String) {
        self.push(flag.clone(), flag);
    }
}

struct InvocationBuilder<'a> {
    base: BaseArguments,
    user_params: &'a str,
}

impl InvocationBuilder<'_> {
    fn user_params_len(&self) -> usize {
        if self.user_params.is_empty() {
            0
        } else {
            self.user_params.len() + 1
        }
    }

    fn build(&self, test_cases: Vec<Arc<TestCase>>, filter: Option<&str>) -> CommandLineInvocation {
        let mut command_line = self.base.command_line.clone();
        let mut args = self.base.args.clone();
        if let Some(filter) = filter {
            swrite!(command_line, "{FILTER_OPTION}{filter}");
            args.push(format!("{}{filter}", FILTER_OPTION.trim_start()));
        }
        if !self.user_params.is_empty() {
            swrite!(command_line, " {}", self.user_params);
            args.extend(split_user_params(self.user_params));
        }
        CommandLineInvocation {
            test_cases,
            command_line,
            args,
        }
    }
}

enum FilterSegment<'a> {
    Suite(&'a str),
    Test(&'a str),
}

impl FilterSegment<'_> {
    /// Suite patterns carry their own trailing separator.
    fn render(&self) -> String {
        match self {
            Self::Suite(suite) => format!("{suite}.*:"),
            Self::Test(name) => (*name).to_owned(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Suite(suite) => suite.len() + 3,
            Self::Test(name) => name.len(),
        }
    }
}

#[derive(Default)]
struct FilterGroup {
    filter: String,
    tests: Vec<Arc<TestCase>>,
}

/// Packs filter segments greedily into groups that each fit the budget.
struct FilterPacker {
    budget: usize,
    done: Vec<FilterGroup>,
    current: FilterGroup,
}

impl FilterPacker {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            done: Vec::new(),
            current: FilterGroup::default(),
        }
    }

    fn push(&mut self, segment: FilterSegment<'_>, tests: Vec<Arc<TestCase>>) -> Result<(), PlanError> {
        let segment = segment.render();
        if segment.len() > self.budget {
            return Err(PlanError::FilterTooLong {
                segment,
                budget: self.budget,
            });
        }

        let needs_separator =
            !self.current.filter.is_empty() && !self.current.filter.ends_with(':');
        let added = segment.len() + usize::from(needs_separator);
        if self.current.filter.len() + added > self.budget {
            self.done.push(std::mem::take(&mut self.current));
        } else if needs_separator {
            self.current.filter.push(':');
        }
        self.current.filter.push_str(&segment);
        self.current.tests.extend(tests);
        Ok(())
    }

    fn finish(mut self) -> Vec<FilterGroup> {
        if !self.current.filter.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}
