// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted oracles and proptest strategies for depmin-runner tests.

use crate::{
    errors::OracleError,
    oracle::{ExecutionOracle, RunOutcomes, TestExecution},
    order::ExecutionOrder,
};
use depmin_metadata::{Outcome, TestName};
use proptest::prelude::*;
use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

type Rule = Box<dyn FnMut(&[TestName]) -> Outcome>;

/// An in-memory oracle. The outcome of the dependent test is computed by a rule from the tests
/// that run before it.
pub(crate) struct FakeOracle {
    dependent_test: TestName,
    rule: Rule,
    runs: Vec<ExecutionOrder>,
    fail_on_run: Option<usize>,
}

impl FakeOracle {
    pub(crate) fn new(
        dependent_test: &str,
        rule: impl FnMut(&[TestName]) -> Outcome + 'static,
    ) -> Self {
        Self {
            dependent_test: dependent_test.into(),
            rule: Box::new(rule),
            runs: Vec::new(),
            fail_on_run: None,
        }
    }

    /// The dependent test produces `with` if all of `deps` run before it, and `without`
    /// otherwise. Other tests are irrelevant.
    pub(crate) fn requiring(
        dependent_test: &str,
        deps: &[&str],
        with: Outcome,
        without: Outcome,
    ) -> Self {
        let deps: Vec<TestName> = deps.iter().copied().map(TestName::new).collect();
        Self::new(dependent_test, move |prefix| {
            if deps.iter().all(|dep| prefix.contains(dep)) {
                with
            } else {
                without
            }
        })
    }

    /// An arbitrary deterministic oracle over the sub-sequences of `candidates`.
    ///
    /// Each prefix is mapped to a bitmask of the candidates it contains, which indexes into
    /// `table`.
    pub(crate) fn from_table(
        dependent_test: &str,
        candidates: &[TestName],
        table: Vec<Outcome>,
    ) -> Self {
        let indexes: HashMap<TestName, usize> = candidates
            .iter()
            .enumerate()
            .map(|(index, test)| (test.clone(), index))
            .collect();
        Self::new(dependent_test, move |prefix| {
            let mask = prefix
                .iter()
                .filter_map(|test| indexes.get(test))
                .fold(0usize, |mask, index| mask | (1 << index));
            table[mask % table.len()]
        })
    }

    /// Makes the `run`th call (1-based) fail with an execution error.
    pub(crate) fn fail_on_run(mut self, run: usize) -> Self {
        self.fail_on_run = Some(run);
        self
    }

    /// Returns every order run so far.
    pub(crate) fn runs(&self) -> &[ExecutionOrder] {
        &self.runs
    }
}

impl ExecutionOracle for FakeOracle {
    fn run_order(
        &mut self,
        order: &ExecutionOrder,
        watch: &BTreeSet<TestName>,
    ) -> Result<RunOutcomes, OracleError> {
        self.runs.push(order.clone());
        if self.fail_on_run == Some(self.runs.len()) {
            return Err(OracleError::execution("injected failure"));
        }

        let mut outcomes = RunOutcomes::new();
        if watch.contains(&self.dependent_test) && order.position(&self.dependent_test).is_some() {
            let outcome = (self.rule)(order.tests_before(&self.dependent_test));
            outcomes.insert(
                self.dependent_test.clone(),
                TestExecution {
                    outcome,
                    duration: Duration::from_millis(10),
                },
            );
        }
        Ok(outcomes)
    }
}

/// Builds test names `t0`, `t1`, ... `t{count - 1}`.
pub(crate) fn test_names(count: usize) -> Vec<TestName> {
    (0..count).map(|index| TestName::new(format!("t{index}"))).collect()
}

pub(crate) fn arb_outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Pass),
        Just(Outcome::Fail),
        Just(Outcome::Error),
    ]
}

/// Strategy for an outcome table covering every subset of up to `max_candidates` candidates.
pub(crate) fn arb_outcome_table(max_candidates: usize) -> impl Strategy<Value = Vec<Outcome>> {
    proptest::collection::vec(arb_outcome(), 1 << max_candidates)
}
