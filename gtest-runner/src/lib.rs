// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for running GoogleTest executables.
//!
//! The basic flow is:
//!
//! 1. [`config::GtestConfig`] resolves per-executable settings.
//! 2. [`list::TestList::discover`] lists the tests of each executable, resolving source
//!    locations and traits through [`resolver`].
//! 3. [`runner::TestRunner`] splits the tests across workers ([`partition`]), packs them into
//!    command lines ([`command_line`]), runs them and turns their output into results
//!    ([`parser`]).
//! 4. Results flow to the host through a [`reporter::Reporter`].

pub mod byte_search;
pub mod command_line;
pub mod config;
pub mod durations;
pub mod errors;
pub mod list;
pub mod parser;
pub mod partition;
pub mod reporter;
pub mod resolver;
pub mod runner;
pub mod test_case;
pub mod test_command;
pub mod test_result;
