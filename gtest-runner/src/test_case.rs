// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovered test cases.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fmt;

/// A single test discovered in a GoogleTest executable.
///
/// Test cases are created once during discovery and are not mutated afterwards. Results and
/// invocations refer to them through `Arc<TestCase>`, keyed by [`Self::fully_qualified_name`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestCase {
    fully_qualified_name: String,
    display_name: String,
    executable: Utf8PathBuf,
    source_file: Option<Utf8PathBuf>,
    line: u32,
    traits: Vec<Trait>,
    is_exit_code_test: bool,
    metadata: TestCaseMetadata,
}

impl TestCase {
    /// Creates a new test case without a source location.
    pub fn new(
        fully_qualified_name: impl Into<String>,
        display_name: impl Into<String>,
        executable: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            fully_qualified_name: fully_qualified_name.into(),
            display_name: display_name.into(),
            executable: executable.into(),
            source_file: None,
            line: 0,
            traits: Vec::new(),
            is_exit_code_test: false,
            metadata: TestCaseMetadata::default(),
        }
    }

    /// Creates the synthetic test that reports the exit code of `executable`.
    ///
    /// The name is the executable's file name with `.` replaced by `_`, followed by
    /// `.{test_name}`.
    pub fn exit_code_test(executable: impl Into<Utf8PathBuf>, test_name: &str) -> Self {
        let executable = executable.into();
        let file_name = executable.file_name().unwrap_or(executable.as_str());
        let name = format!("{}.{test_name}", file_name.replace('.', "_"));
        let mut test_case = Self::new(name.clone(), name, executable);
        test_case.is_exit_code_test = true;
        test_case
    }

    /// Sets the source location.
    pub fn with_location(mut self, source_file: impl Into<Utf8PathBuf>, line: u32) -> Self {
        let source_file = source_file.into();
        self.source_file = (!source_file.as_str().is_empty()).then_some(source_file);
        self.line = line;
        self
    }

    /// Sets the traits, replacing any existing ones.
    pub fn with_traits(mut self, traits: Vec<Trait>) -> Self {
        self.traits = traits;
        self
    }

    /// Sets the suite and executable counts.
    pub fn with_metadata(mut self, metadata: TestCaseMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The fully-qualified name, `Suite.Name`, including any instantiation prefix or index.
    pub fn fully_qualified_name(&self) -> &str {
        &self.fully_qualified_name
    }

    /// The human-readable name, which can include type and value parameters.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The executable that contains this test.
    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    /// The source file, if symbol resolution found one.
    pub fn source_file(&self) -> Option<&Utf8Path> {
        self.source_file.as_deref()
    }

    /// The 1-based line number, or 0 if unresolved.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The traits attached to this test, in override order.
    pub fn traits(&self) -> &[Trait] {
        &self.traits
    }

    /// Whether this is the synthetic exit-code test.
    pub fn is_exit_code_test(&self) -> bool {
        self.is_exit_code_test
    }

    /// Counts computed at discovery time.
    pub fn metadata(&self) -> TestCaseMetadata {
        self.metadata
    }

    /// The suite name used for `Suite.*` filters: the text before the first `.`.
    pub fn suite(&self) -> &str {
        self.fully_qualified_name
            .split_once('.')
            .map_or(self.fully_qualified_name.as_str(), |(suite, _)| suite)
    }

    /// The name used in `--gtest_filter` arguments.
    ///
    /// Anything after the first space is dropped.
    pub fn filter_name(&self) -> &str {
        self.fully_qualified_name
            .split_once(' ')
            .map_or(self.fully_qualified_name.as_str(), |(name, _)| name)
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Counts attached to each test case, used to decide whether a whole suite or a whole
/// executable is being run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestCaseMetadata {
    /// Number of tests in this test's suite.
    pub tests_in_suite: usize,

    /// Number of tests in this test's executable.
    pub tests_in_executable: usize,
}

/// A name/value annotation attached to a test.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Trait {
    /// The trait name.
    pub name: String,

    /// The trait value.
    pub value: String,
}

impl Trait {
    /// Creates a new trait.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Trait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exit_code_test_name() {
        let test_case = TestCase::exit_code_test("/tmp/bin/my.tests.exe", "ExitCode");
        assert_eq!(test_case.fully_qualified_name(), "my_tests_exe.ExitCode");
        assert_eq!(test_case.display_name(), "my_tests_exe.ExitCode");
        assert!(test_case.is_exit_code_test());
        assert_eq!(test_case.suite(), "my_tests_exe");
    }

    #[test]
    fn suite_and_filter_name() {
        let test_case = TestCase::new(
            "InstantiationName/ParamSuite.Test/0 [42]",
            "InstantiationName/ParamSuite.Test/0 [42]",
            "/bin/tests",
        );
        assert_eq!(test_case.suite(), "InstantiationName/ParamSuite");
        assert_eq!(test_case.filter_name(), "InstantiationName/ParamSuite.Test/0");
    }

    #[test]
    fn empty_location_is_unresolved() {
        let test_case = TestCase::new("A.B", "A.B", "/bin/tests").with_location("", 0);
        assert_eq!(test_case.source_file(), None);
        assert_eq!(test_case.line(), 0);

        let test_case = test_case.with_location("/src/a.cpp", 12);
        assert_eq!(test_case.source_file(), Some(Utf8Path::new("/src/a.cpp")));
        assert_eq!(test_case.line(), 12);
    }
}
