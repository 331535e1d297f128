// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{OutputFormat, Styles, TestCatalogBuilder, find_test_executables};
use crate::{
    config::GtestConfig,
    errors::{FindExecutablesError, WriteTestListError},
    resolver::SymbolResolverFactory,
    test_case::TestCase,
};
use camino::{Utf8Path, Utf8PathBuf};
use gtest_metadata::{ExecutableSummary, TestCaseSummary, TestListSummary, TraitSummary};
use owo_colors::OwoColorize;
use std::{collections::BTreeMap, io, io::Write, sync::Arc};
use tracing::debug;

/// The tests of one executable.
#[derive(Clone, Debug, Default)]
pub struct ExecutableTests {
    /// The directory the tests were listed in.
    pub cwd: Utf8PathBuf,

    /// The tests, in listing order. The exit-code test, if any, comes last.
    pub test_cases: Vec<Arc<TestCase>>,
}

/// The tests of a set of executables.
#[derive(Clone, Debug, Default)]
pub struct TestList {
    executables: BTreeMap<Utf8PathBuf, ExecutableTests>,
    test_count: usize,
}

impl TestList {
    /// Finds the GoogleTest executables among `paths` and lists their tests.
    ///
    /// Directories in `paths` are scanned for executables. Executables are split across as many
    /// threads as the first executable's settings allow. Executables that fail to list are
    /// logged and included without tests.
    pub fn discover(
        config: &GtestConfig,
        paths: &[Utf8PathBuf],
        resolver_factory: &dyn SymbolResolverFactory,
    ) -> Result<Self, FindExecutablesError> {
        let executables = find_test_executables(paths, config)?;
        debug!(
            "found {} test executables in {} paths",
            executables.len(),
            paths.len()
        );
        let Some(first) = executables.first() else {
            return Ok(Self::default());
        };
        let chunk_size = executables
            .len()
            .div_ceil(config.settings_for(first).max_workers);

        let listed: Vec<(Utf8PathBuf, ExecutableTests)> = std::thread::scope(|scope| {
            let handles: Vec<_> = executables
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|executable| {
                                let settings = config.settings_for(executable);
                                let test_cases =
                                    TestCatalogBuilder::new(&settings, resolver_factory)
                                        .build_catalog();
                                let tests = ExecutableTests {
                                    cwd: settings.discovery_working_dir(),
                                    test_cases: test_cases.into_iter().map(Arc::new).collect(),
                                };
                                (executable.clone(), tests)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(listed) => listed,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        Ok(Self::new(listed))
    }

    /// Creates a list from already-built test cases.
    pub fn new(executables: impl IntoIterator<Item = (Utf8PathBuf, ExecutableTests)>) -> Self {
        let executables: BTreeMap<_, _> = executables.into_iter().collect();
        let test_count = executables
            .values()
            .map(|tests| tests.test_cases.len())
            .sum();
        debug!(
            "test list has {test_count} tests across {} executables",
            executables.len()
        );
        Self {
            executables,
            test_count,
        }
    }

    /// The number of tests, including exit-code tests.
    pub fn test_count(&self) -> usize {
        self.test_count
    }

    /// Iterates over the executables and their tests.
    pub fn iter(&self) -> impl Iterator<Item = (&Utf8Path, &ExecutableTests)> + '_ {
        self.executables
            .iter()
            .map(|(path, tests)| (path.as_path(), tests))
    }

    /// Iterates over every test.
    pub fn iter_tests(&self) -> impl Iterator<Item = &Arc<TestCase>> + '_ {
        self.executables
            .values()
            .flat_map(|tests| tests.test_cases.iter())
    }

    /// Returns the tests whose display name contains any of `patterns`.
    ///
    /// An empty pattern list selects every test.
    pub fn filtered(&self, patterns: &[String]) -> Vec<Arc<TestCase>> {
        self.iter_tests()
            .filter(|test_case| {
                patterns.is_empty()
                    || patterns
                        .iter()
                        .any(|pattern| test_case.display_name().contains(pattern.as_str()))
            })
            .cloned()
            .collect()
    }

    /// Converts this list into its machine-readable form.
    pub fn to_summary(&self) -> TestListSummary {
        let mut summary = TestListSummary::new();
        summary.test_count = self.test_count;
        summary.executables = self
            .executables
            .iter()
            .map(|(path, tests)| {
                let executable = ExecutableSummary::new(
                    tests.cwd.clone(),
                    tests
                        .test_cases
                        .iter()
                        .map(|test_case| test_case_summary(test_case))
                        .collect(),
                );
                (path.clone(), executable)
            })
            .collect();
        summary
    }

    /// Outputs this list to the given writer.
    pub fn write(
        &self,
        output_format: OutputFormat,
        writer: impl Write,
        colorize: bool,
    ) -> Result<(), WriteTestListError> {
        match output_format {
            OutputFormat::Human { verbose } => self
                .write_human(writer, verbose, colorize)
                .map_err(WriteTestListError::Io),
            OutputFormat::Serializable(format) => format
                .to_writer(&self.to_summary(), writer)
                .map_err(WriteTestListError::Json),
        }
    }

    /// Outputs this list as a string with the given format.
    pub fn to_string(&self, output_format: OutputFormat) -> Result<String, WriteTestListError> {
        let mut buf = Vec::with_capacity(1024);
        self.write(output_format, &mut buf, false)?;
        Ok(String::from_utf8(buf).expect("buffer is valid UTF-8"))
    }

    fn write_human(&self, mut writer: impl Write, verbose: bool, colorize: bool) -> io::Result<()> {
        let mut styles = Styles::default();
        if colorize {
            styles.colorize();
        }

        for (executable, tests) in &self.executables {
            writeln!(writer, "{}:", executable.style(styles.executable))?;
            if verbose {
                writeln!(writer, "  {} {}", "cwd:".style(styles.field), tests.cwd)?;
            }

            if tests.test_cases.is_empty() {
                writeln!(writer, "    (no tests)")?;
                continue;
            }
            for test_case in &tests.test_cases {
                write!(writer, "    {}", test_case.display_name().style(styles.test_name))?;
                if verbose {
                    if let Some(source_file) = test_case.source_file() {
                        let location = format!("{source_file}:{}", test_case.line());
                        write!(writer, " ({})", location.style(styles.location))?;
                    }
                    for test_trait in test_case.traits() {
                        write!(writer, " [{}={}]", test_trait.name, test_trait.value)?;
                    }
                }
                writeln!(writer)?;
            }
        }
        Ok(())
    }
}

fn test_case_summary(test_case: &TestCase) -> TestCaseSummary {
    let mut summary =
        TestCaseSummary::new(test_case.fully_qualified_name(), test_case.display_name());
    summary.source_file = test_case.source_file().map(Utf8Path::to_owned);
    summary.line = test_case.line();
    summary.traits = test_case
        .traits()
        .iter()
        .map(|test_trait| TraitSummary::new(&test_trait.name, &test_trait.value))
        .collect();
    summary.is_exit_code_test = test_case.is_exit_code_test();
    summary
}
