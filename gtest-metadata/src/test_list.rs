// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io};

/// Root element for a serializable list of GoogleTest tests.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct TestListSummary {
    /// Number of tests across all executables, including exit-code tests.
    pub test_count: usize,

    /// Test executables, keyed by path.
    pub executables: BTreeMap<Utf8PathBuf, ExecutableSummary>,
}

impl TestListSummary {
    /// Creates an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses JSON output from `gtest-adapter list --message-format json`.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }

    /// Writes this summary as JSON.
    pub fn write_json(&self, writer: impl io::Write, pretty: bool) -> serde_json::Result<()> {
        if pretty {
            serde_json::to_writer_pretty(writer, self)
        } else {
            serde_json::to_writer(writer, self)
        }
    }
}

/// The tests of one executable.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct ExecutableSummary {
    /// The working directory tests are listed in.
    pub cwd: Utf8PathBuf,

    /// The tests, in the order the executable listed them.
    pub test_cases: Vec<TestCaseSummary>,
}

impl ExecutableSummary {
    /// Creates a summary for tests listed in `cwd`.
    pub fn new(cwd: impl Into<Utf8PathBuf>, test_cases: Vec<TestCaseSummary>) -> Self {
        Self {
            cwd: cwd.into(),
            test_cases,
        }
    }
}

/// One test.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct TestCaseSummary {
    /// `Suite.Name`, including any instantiation prefix and index.
    pub fully_qualified_name: String,

    /// The name including type and value parameters.
    pub display_name: String,

    /// The source file, if it could be resolved.
    #[serde(default)]
    pub source_file: Option<Utf8PathBuf>,

    /// The 1-based line, or 0.
    #[serde(default)]
    pub line: u32,

    /// Traits, in override order.
    #[serde(default)]
    pub traits: Vec<TraitSummary>,

    /// Whether this is the synthetic test reporting the executable's exit code.
    #[serde(default)]
    pub is_exit_code_test: bool,
}

impl TestCaseSummary {
    /// Creates a summary for a test without a location or traits.
    pub fn new(fully_qualified_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            fully_qualified_name: fully_qualified_name.into(),
            display_name: display_name.into(),
            source_file: None,
            line: 0,
            traits: Vec::new(),
            is_exit_code_test: false,
        }
    }
}

/// A name/value annotation of a test.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub struct TraitSummary {
    /// The trait name.
    pub name: String,

    /// The trait value.
    pub value: String,
}

impl TraitSummary {
    /// Creates a new trait summary.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
