// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running tests.
//!
//! [`TestRunner`] splits tests across worker threads. Each worker gets its own test directory,
//! runs the setup script, then runs its tests one executable at a time and reports progress
//! through a [`Reporter`](crate::reporter::Reporter). Exit-code tests are reported once all
//! workers are done.

mod cancel;
mod coordinator;
mod executor;

pub use cancel::*;
pub use coordinator::*;
