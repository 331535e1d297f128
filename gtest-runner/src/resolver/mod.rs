// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symbol resolution: maps test methods to source locations and compile-time traits.
//!
//! Resolution reads PE headers directly ([`pe`]) to find imported DLLs and the embedded path of
//! the program database, locates that database ([`PdbLocator`]), and queries it through the
//! [`SymbolResolver`] trait. [`BinaryMetadataResolver`] drives the whole process for one
//! executable.
//!
//! Nothing in this module aborts discovery: failures are logged and collected as warnings.

mod binary;
mod locator;
pub mod pe;
mod pdb_resolver;
mod symbols;

pub use binary::*;
pub use locator::*;
pub use pdb_resolver::*;
pub use symbols::*;

#[cfg(test)]
pub(crate) use binary::test_helpers;
