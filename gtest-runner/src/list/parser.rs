// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use regex::Regex;
use std::sync::LazyLock;

/// Follows the suite name of typed tests in `--gtest_list_tests` output.
pub const TYPED_TEST_MARKER: &str = ".  # TypeParam = ";

/// Follows the test name of value-parameterized tests in `--gtest_list_tests` output.
pub const PARAMETERIZED_TEST_MARKER: &str = "  # GetParam() = ";

static SUITE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^([\w/\p{{Nl}}]*(?:\.[\w/\p{{Nl}}]+)*)(?:{}(.*))?",
        regex::escape(TYPED_TEST_MARKER)
    ))
    .expect("suite regex is valid")
});

static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^([\w/\p{{Nl}}]*)(?:{}(.*))?",
        regex::escape(PARAMETERIZED_TEST_MARKER)
    ))
    .expect("name regex is valid")
});

static IS_PARAM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+/)?\w+/\d+").expect("param regex is valid"));

/// How a test was declared.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TestKind {
    /// `TEST` or `TEST_F`.
    Plain,

    /// `TEST_P`, instantiated with `INSTANTIATE_TEST_SUITE_P`.
    Parameterized,

    /// `TYPED_TEST` or `TYPED_TEST_P`.
    Typed,
}

/// One test as described by `--gtest_list_tests`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestDescriptor {
    /// The suite, including any instantiation prefix and type index, e.g. `Prefix/Suite/0`.
    pub suite: String,

    /// The test name, including any parameter index, e.g. `Test/3`.
    pub name: String,

    /// The type parameter of typed tests, without `class ` and `struct ` keywords.
    pub type_param: Option<String>,

    /// The printed value parameter of parameterized tests.
    pub param: Option<String>,

    /// `suite.name`.
    pub fully_qualified_name: String,

    /// The fully-qualified name decorated with the type and value parameters.
    pub display_name: String,

    /// How the test was declared.
    pub kind: TestKind,
}

/// Parses the output of `--gtest_list_tests`, one line at a time.
///
/// Unindented lines name a suite; lines indented by two spaces name a test in the most recent
/// suite.
#[derive(Clone, Debug, Default)]
pub struct ListTestsParser {
    test_name_separator: Option<String>,
    current_suite: String,
}

impl ListTestsParser {
    /// Creates a parser. If `test_name_separator` is set, `/` in display names is replaced by it.
    pub fn new(test_name_separator: Option<&str>) -> Self {
        Self {
            test_name_separator: test_name_separator
                .filter(|separator| !separator.is_empty())
                .map(str::to_owned),
            current_suite: String::new(),
        }
    }

    /// Parses a complete output.
    pub fn parse<'a>(mut self, lines: impl IntoIterator<Item = &'a str>) -> Vec<TestDescriptor> {
        lines
            .into_iter()
            .filter_map(|line| self.report_line(line))
            .collect()
    }

    /// Feeds one line, returning a descriptor if the line names a test.
    pub fn report_line(&mut self, line: &str) -> Option<TestDescriptor> {
        let trimmed = line.trim_matches(['.', '\n', '\r']);
        if let Some(test_line) = trimmed.strip_prefix("  ") {
            Some(self.create_descriptor(test_line))
        } else {
            self.current_suite = trimmed.to_owned();
            None
        }
    }

    fn create_descriptor(&self, test_line: &str) -> TestDescriptor {
        let (suite, type_param) = match SUITE_REGEX.captures(&self.current_suite) {
            Some(captures) => (
                captures.get(1).map_or("", |m| m.as_str()),
                captures.get(2).map(|m| {
                    m.as_str()
                        .replace("class ", "")
                        .replace("struct ", "")
                }),
            ),
            None => (self.current_suite.as_str(), None),
        };
        let (name, param) = match NAME_REGEX.captures(test_line) {
            Some(captures) => (
                captures.get(1).map_or("", |m| m.as_str()),
                captures.get(2).map(|m| m.as_str().to_owned()),
            ),
            None => (test_line, None),
        };
        let type_param = type_param.filter(|t| !t.is_empty());
        let param = param.filter(|p| !p.is_empty());

        let fully_qualified_name = format!("{suite}.{name}");
        let mut display_name = fully_qualified_name.clone();
        if let Some(type_param) = &type_param {
            display_name.push_str(&enclosed_type_param(type_param));
        }
        if let Some(param) = &param {
            display_name.push_str(&format!(" [{param}]"));
        }
        if let Some(separator) = &self.test_name_separator {
            display_name = display_name.replace('/', separator);
        }

        let kind = if IS_PARAM_REGEX.is_match(suite) {
            TestKind::Typed
        } else if IS_PARAM_REGEX.is_match(name) {
            TestKind::Parameterized
        } else {
            TestKind::Plain
        };

        TestDescriptor {
            suite: suite.to_owned(),
            name: name.to_owned(),
            type_param,
            param,
            fully_qualified_name,
            display_name,
            kind,
        }
    }
}

/// Wraps a type parameter in angle brackets, keeping `> >` apart for nested templates.
pub(crate) fn enclosed_type_param(type_param: &str) -> String {
    if type_param.ends_with('>') {
        format!("<{type_param} >")
    } else {
        format!("<{type_param}>")
    }
}
