// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning GoogleTest output into test results.
//!
//! A test process produces two kinds of output: console lines, which [`StreamingResultParser`]
//! reads while the process runs, and an XML report written at exit, read by
//! [`XmlResultParser`]. [`TestResultCollector`] combines both.

mod collector;
mod error_message;
mod streaming;
mod xml;

pub use collector::*;
pub use error_message::*;
pub use streaming::*;
pub use xml::*;
