// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable data formats for depmin.
//!
//! This crate contains the serialized forms shared between the depmin runner, the `depmin`
//! binary and any external tooling:
//!
//! * dependent-test lists produced by an order-dependency detector ([`DependentTestList`]),
//! * persisted minimization records ([`MinimizationSummary`]),
//! * the request/response protocol spoken with external test executors ([`OracleRequest`],
//!   [`OracleResponse`]).

mod errors;
mod exit_codes;
mod summary;

pub use errors::*;
pub use exit_codes::*;
pub use summary::*;
