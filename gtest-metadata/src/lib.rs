// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to gtest-adapter machine-readable output.
//!
//! `gtest-adapter list --message-format json` prints a [`TestListSummary`]. Exit codes of
//! `gtest-adapter` are documented in [`GtestExitCode`].

mod exit_codes;
mod test_list;

pub use exit_codes::*;
pub use test_list::*;
