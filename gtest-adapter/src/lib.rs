// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovers and runs GoogleTest executables.
//!
//! `gtest-adapter list` prints the tests of a set of executables, `gtest-adapter run` runs them
//! and `gtest-adapter show-settings` prints the settings resolved for one executable.
//!
//! The library behind this binary is `gtest-runner`; this crate is its command-line front end.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod junit;
mod output;
mod reporter;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
