// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution oracle: "run this ordered list of tests, report outcomes for a watched subset".
//!
//! depmin never executes tests itself. All test execution goes through an implementation of
//! [`ExecutionOracle`]; [`CommandOracle`] delegates to an external command.

mod command;

pub use command::CommandOracle;

use crate::{errors::OracleError, order::ExecutionOrder};
use depmin_metadata::{Outcome, TestName};
use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

/// The result of executing a single test within an oracle run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TestExecution {
    /// The outcome of the test.
    pub outcome: Outcome,

    /// How long the test took to run.
    pub duration: Duration,
}

/// Per-test results from an oracle run.
pub type RunOutcomes = BTreeMap<TestName, TestExecution>;

/// Runs ordered lists of tests.
///
/// Each call to [`run_order`](Self::run_order) executes the entire order, sequentially, in a
/// single process or session, and blocks until it completes. Calls are expensive: they may take
/// seconds to minutes.
///
/// Oracles take `&mut self` because test execution may mutate shared fixtures or static state. An
/// oracle must not be shared between concurrently running minimization sessions unless its
/// implementation documents that runs are isolated from each other.
pub trait ExecutionOracle {
    /// Runs `order` and returns outcomes for (at least) the tests in `watch`.
    fn run_order(
        &mut self,
        order: &ExecutionOrder,
        watch: &BTreeSet<TestName>,
    ) -> Result<RunOutcomes, OracleError>;

    /// Runs `order` and returns the result for a single watched test.
    ///
    /// It is an execution error for the oracle to not report `test`.
    fn run_watching(
        &mut self,
        order: &ExecutionOrder,
        test: &TestName,
    ) -> Result<TestExecution, OracleError> {
        let watch = BTreeSet::from([test.clone()]);
        let mut outcomes = self.run_order(order, &watch)?;
        outcomes
            .remove(test)
            .ok_or_else(|| OracleError::missing_outcome(test, order.len()))
    }
}

impl<O: ExecutionOracle + ?Sized> ExecutionOracle for &mut O {
    fn run_order(
        &mut self,
        order: &ExecutionOrder,
        watch: &BTreeSet<TestName>,
    ) -> Result<RunOutcomes, OracleError> {
        (**self).run_order(order, watch)
    }
}

impl<O: ExecutionOracle + ?Sized> ExecutionOracle for Box<O> {
    fn run_order(
        &mut self,
        order: &ExecutionOrder,
        watch: &BTreeSet<TestName>,
    ) -> Result<RunOutcomes, OracleError> {
        (**self).run_order(order, watch)
    }
}
