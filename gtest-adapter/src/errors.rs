// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use gtest_metadata::GtestExitCode;
use gtest_runner::errors::{ConfigParseError, FindExecutablesError, WriteTestListError};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that gtest-adapter expects and reports without a backtrace.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirInvalid {
        #[source]
        err: std::io::Error,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("finding test executables failed")]
    FindExecutablesError {
        #[from]
        err: FindExecutablesError,
    },
    #[error("writing test list to output failed")]
    WriteTestListError {
        #[from]
        err: WriteTestListError,
    },
    #[error("writing JUnit report failed")]
    JunitWriteError {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("serializing JUnit report failed")]
    JunitSerializeError {
        path: Utf8PathBuf,
        #[source]
        err: quick_junit::SerializeError,
    },
    #[error("writing output failed")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("no tests to run")]
    NoTestsRun,
    #[error("test run failed")]
    TestRunFailed,
}

impl ExpectedError {
    pub(crate) fn current_dir_invalid(err: std::io::Error) -> Self {
        Self::CurrentDirInvalid { err }
    }

    pub(crate) fn config_parse_error(err: ConfigParseError) -> Self {
        Self::ConfigParseError { err }
    }

    pub(crate) fn junit_write_error(path: impl Into<Utf8PathBuf>, err: std::io::Error) -> Self {
        Self::JunitWriteError {
            path: path.into(),
            err,
        }
    }

    pub(crate) fn junit_serialize_error(
        path: impl Into<Utf8PathBuf>,
        err: quick_junit::SerializeError,
    ) -> Self {
        Self::JunitSerializeError {
            path: path.into(),
            err,
        }
    }

    pub(crate) fn write_output_error(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirInvalid { .. }
            | Self::ConfigParseError { .. }
            | Self::FindExecutablesError { .. } => GtestExitCode::SETUP_ERROR,
            Self::WriteTestListError { .. }
            | Self::JunitWriteError { .. }
            | Self::JunitSerializeError { .. }
            | Self::WriteOutputError { .. } => GtestExitCode::WRITE_OUTPUT_ERROR,
            Self::NoTestsRun => GtestExitCode::NO_TESTS_RUN,
            Self::TestRunFailed => GtestExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirInvalid { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config file `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::FindExecutablesError { err } => {
                error!(
                    "failed to search `{}` for test executables",
                    err.path().style(styles.bold)
                );
                err.source()
            }
            Self::WriteTestListError { err } => {
                error!("failed to write test list to output");
                Some(err as &dyn Error)
            }
            Self::JunitWriteError { path, err } => {
                error!("failed to write JUnit report to `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::JunitSerializeError { path, err } => {
                error!(
                    "failed to serialize JUnit report for `{}`",
                    path.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
            Self::NoTestsRun => {
                error!(
                    "{}",
                    "no tests to run (use --filter with fewer or no patterns to select more)"
                        .style(styles.warning_text)
                );
                None
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn exit_codes() {
        assert_eq!(
            ExpectedError::TestRunFailed.process_exit_code(),
            GtestExitCode::TEST_RUN_FAILED
        );
        assert_eq!(
            ExpectedError::NoTestsRun.process_exit_code(),
            GtestExitCode::NO_TESTS_RUN
        );
        assert_eq!(
            ExpectedError::current_dir_invalid(io::Error::other("gone")).process_exit_code(),
            GtestExitCode::SETUP_ERROR
        );
        assert_eq!(
            ExpectedError::junit_write_error("/out/junit.xml", io::Error::other("full"))
                .process_exit_code(),
            GtestExitCode::WRITE_OUTPUT_ERROR
        );
    }
}
