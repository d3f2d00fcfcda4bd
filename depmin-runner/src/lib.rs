// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for depmin: minimizing and verifying the test-order dependencies of a
//! dependent test, while watching for flaky outcomes.
//!
//! The basic flow of operations is:
//!
//! 1. An order-dependency detector produces a [`DependentTestList`](depmin_metadata::DependentTestList).
//! 2. For each dependent test, a [`DependencyMinimizer`](minimize::DependencyMinimizer) queries an
//!    [`ExecutionOracle`](oracle::ExecutionOracle), routing every observed outcome through a
//!    [`FlakinessMonitor`](flaky::FlakinessMonitor).
//! 3. A [`MinimizationVerifier`](verify::MinimizationVerifier) re-runs the result to confirm that
//!    it is sufficient and minimal.
//! 4. The [`ResultStore`](store::ResultStore) persists the verified (or unverified) result.
//!
//! [`BatchMinimizer`](session::BatchMinimizer) ties these together.

pub mod config;
pub mod errors;
pub mod flaky;
mod helpers;
pub mod minimize;
pub mod oracle;
pub mod order;
pub mod session;
mod stopwatch;
pub mod store;
#[cfg(test)]
mod test_helpers;
pub mod verify;
