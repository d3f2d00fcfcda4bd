// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Find and verify the minimal test-order dependencies of order-dependent tests.
//!
//! depmin reads a list of dependent tests produced by an order-dependency detector, minimizes the
//! dependencies of each one by re-running tests through an external command, and writes one
//! record per test to an output directory.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
