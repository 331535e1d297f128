// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `gtest-adapter` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum GtestExitCode {}

impl GtestExitCode {
    /// No errors occurred and gtest-adapter exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up a gtest-adapter invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
