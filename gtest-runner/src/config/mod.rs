// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for gtest-adapter.
//!
//! Configuration is read from TOML in two layers: the built-in defaults, and an optional
//! repository file. Each executable then gets an [`ExecutableSettings`] snapshot, which applies
//! the first matching `[[overrides]]` entry on top of the solution-wide settings. Snapshots are
//! passed explicitly to everything that needs them.

mod placeholders;
mod regex_traits;
mod settings;

pub use placeholders::*;
pub use regex_traits::*;
pub use settings::*;

#[cfg(test)]
pub(crate) use settings::{test_config, test_settings};
