// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by gtest-runner.

use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::{error::Error as StdError, fmt, time::Duration};
use thiserror::Error;

/// Displays an error followed by each of its sources, separated by `: `.
#[derive(Clone, Copy, Debug)]
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: StdError> DisplayErrorChain<E> {
    /// Wraps `error` for display.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: StdError> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse gtest-adapter config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// An override's executable filter is not a valid regex.
    #[error("invalid executable filter `{filter}` for override {index}")]
    InvalidOverrideFilter {
        /// The 0-based index of the override.
        index: usize,

        /// The filter that failed to compile.
        filter: String,

        /// The underlying error.
        #[source]
        error: regex::Error,
    },
}

/// An error that occurred while parsing a regex-to-trait rule.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegexTraitParseError {
    /// The rule is not of the form `regex///Name,Value`.
    #[error("rule `{rule}` is not of the form `regex///Name,Value`")]
    InvalidSyntax {
        /// The rule that failed to parse.
        rule: String,
    },

    /// The regex part of the rule failed to compile.
    #[error("rule `{rule}` has an invalid regex")]
    InvalidRegex {
        /// The rule that failed to parse.
        rule: String,

        /// The underlying error.
        #[source]
        error: regex::Error,
    },
}

/// An error that occurred while reading the headers of a PE image.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PeParseError {
    /// The file could not be read.
    #[error("failed to read `{path}`")]
    Read {
        /// The file that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The file does not start with an `MZ` header.
    #[error("not a PE image (missing MZ signature)")]
    InvalidDosHeader,

    /// The NT headers do not carry the `PE\0\0` signature.
    #[error("not a PE image (missing PE signature at offset {offset:#x})")]
    InvalidNtSignature {
        /// The offset the NT headers were expected at.
        offset: usize,
    },

    /// The optional header has an unknown magic value.
    #[error("unknown optional header magic {magic:#x}")]
    UnknownOptionalHeader {
        /// The magic value found.
        magic: u16,
    },

    /// A structure extends past the end of the file.
    #[error("{what} at offset {offset:#x} extends past the end of the image")]
    Truncated {
        /// The structure being read.
        what: &'static str,

        /// The offset of the structure.
        offset: usize,
    },

    /// A relative virtual address does not fall into any section.
    #[error("RVA {rva:#x} is not mapped by any section")]
    UnmappedRva {
        /// The address that could not be mapped.
        rva: u32,
    },
}

/// An error that occurred while reading a debug symbol database.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SymbolResolverError {
    /// The symbol database could not be opened.
    #[error("failed to open symbol database `{pdb}`")]
    Open {
        /// The symbol database.
        pdb: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The symbol database could not be parsed.
    #[error("failed to read symbol database `{pdb}`")]
    Pdb {
        /// The symbol database.
        pdb: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: pdb::Error,
    },
}

/// An error that occurred while listing the tests of an executable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The executable could not be launched.
    #[error("for `{executable}`, launching the list command failed")]
    Launch {
        /// The executable being listed.
        executable: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: ProcessLaunchError,
    },

    /// Waiting for the list command failed.
    #[error("for `{executable}`, running command `{command}` failed")]
    Command {
        /// The executable being listed.
        executable: Utf8PathBuf,

        /// The command that was run.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The list command did not finish in time.
    #[error(
        "for `{executable}`, listing tests did not finish within {}",
        humantime::format_duration(*.timeout)
    )]
    Timeout {
        /// The executable being listed.
        executable: Utf8PathBuf,

        /// The configured timeout.
        timeout: Duration,
    },

    /// The list command exited with a non-zero code.
    #[error(
        "for `{executable}`, command `{command}` exited with code {}\n{}",
        DisplayExitCode(*.exit_code),
        DisplayOutput(.output)
    )]
    NonZeroExit {
        /// The executable being listed.
        executable: Utf8PathBuf,

        /// The command that was run.
        command: String,

        /// The exit code, if the process exited normally.
        exit_code: Option<i32>,

        /// The combined output of the process.
        output: String,
    },
}

struct DisplayExitCode(Option<i32>);

impl fmt::Display for DisplayExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "{code}"),
            None => f.write_str("<signal>"),
        }
    }
}

struct DisplayOutput<'a>(&'a str);

impl fmt::Display for DisplayOutput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.trim().is_empty() {
            f.write_str("(no output)")
        } else {
            write!(f, "output:\n{}", self.0)
        }
    }
}

/// An error that occurred while planning the command lines for a test run.
///
/// This represents an invariant violation: the tests cannot be expressed within the command-line
/// length limit. It is never recovered from silently.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum PlanError {
    /// A single filter segment is longer than the space left on the command line.
    #[error(
        "filter segment `{segment}` ({} characters) does not fit into the remaining \
         command-line budget of {budget} characters",
        .segment.len()
    )]
    FilterTooLong {
        /// The test name or `Suite.*` pattern that did not fit.
        segment: String,

        /// The number of characters that were available.
        budget: usize,
    },
}

/// An error that occurred while looking for test executables.
#[derive(Debug, Error)]
#[error("failed to read directory `{path}`")]
pub struct FindExecutablesError {
    path: Utf8PathBuf,
    #[source]
    error: std::io::Error,
}

impl FindExecutablesError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: std::io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }

    /// The directory that could not be read.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// An error that occurs while writing list output.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteTestListError {
    /// An error occurred while writing the list to the provided output.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),

    /// An error occurred while serializing JSON, or while writing it to the provided output.
    #[error("error serializing to JSON")]
    Json(#[source] serde_json::Error),
}

/// An error that occurred while launching a test process.
#[derive(Debug, Error)]
#[error("failed to launch `{command}` in `{cwd}`")]
pub struct ProcessLaunchError {
    command: String,
    cwd: Utf8PathBuf,
    #[source]
    error: std::io::Error,
}

impl ProcessLaunchError {
    pub(crate) fn new(command: String, cwd: impl Into<Utf8PathBuf>, error: std::io::Error) -> Self {
        Self {
            command,
            cwd: cwd.into(),
            error,
        }
    }

    /// The command line that failed to launch.
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// An error that occurred while reading or writing recorded test durations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DurationStoreError {
    /// The durations file could not be read.
    #[error("failed to read test durations from `{path}`")]
    Read {
        /// The durations file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The durations file is not valid.
    #[error("failed to parse test durations in `{path}`")]
    Parse {
        /// The durations file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The durations file could not be written.
    #[error("failed to write test durations to `{path}`")]
    Write {
        /// The durations file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurred while running a setup or teardown script.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScriptError {
    /// The script could not be run.
    #[error("failed to run script `{script}`")]
    Exec {
        /// The script command line.
        script: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The script exited with a non-zero code.
    #[error("script `{script}` exited with code {}", DisplayExitCode(*.exit_code))]
    Failed {
        /// The script command line.
        script: String,

        /// The exit code, if the process exited normally.
        exit_code: Option<i32>,
    },
}
