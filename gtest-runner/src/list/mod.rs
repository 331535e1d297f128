// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for discovering the tests in GoogleTest executables.
//!
//! Executables are found by [`find_test_executables`], listed with `--gtest_list_tests` by a
//! [`TestCatalogBuilder`], and collected into a [`TestList`].

mod catalog;
mod discovery;
mod output_format;
mod parser;
mod signatures;
mod test_list;

pub use catalog::*;
pub use discovery::*;
pub use output_format::*;
pub use parser::*;
pub use signatures::*;
pub use test_list::*;
