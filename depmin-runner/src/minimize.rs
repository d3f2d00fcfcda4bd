// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dependency search.
//!
//! Given an order in which a dependent test produced some outcome, a [`DependencyMinimizer`]
//! finds the smallest sub-sequence of the preceding tests that reproduces that outcome. The search
//! proceeds in phases, from cheapest to most expensive:
//!
//! 1. Run the dependent test in isolation. If that reproduces the outcome, there are no
//!    dependencies.
//! 2. Run each preceding test on its own before the dependent test. The first one that reproduces
//!    the outcome is the single dependency.
//! 3. Binary search: split the candidates into halves and keep whichever half alone reproduces the
//!    outcome.
//! 4. If both halves or neither reproduce the outcome, fall back to removing candidates one by
//!    one, keeping those whose removal changes the outcome.

use crate::{
    errors::MinimizeError,
    flaky::FlakinessMonitor,
    helpers::plural,
    oracle::ExecutionOracle,
    order::ExecutionOrder,
};
use depmin_metadata::{
    MINIMIZATION_FORMAT_VERSION, MinimizationSummary, Outcome, TestName, VerificationSummary,
};
use std::slice;
use tracing::{debug, info, warn};

/// The dependencies found for a dependent test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MinimizationResult {
    dependent_test: TestName,
    expected_outcome: Outcome,
    deps: Vec<TestName>,
}

impl MinimizationResult {
    /// Creates a new result.
    pub fn new(dependent_test: TestName, expected_outcome: Outcome, deps: Vec<TestName>) -> Self {
        Self {
            dependent_test,
            expected_outcome,
            deps,
        }
    }

    /// Creates a result from its persisted form.
    pub fn from_summary(summary: &MinimizationSummary) -> Self {
        Self::new(
            summary.dependent_test.clone(),
            summary.expected_outcome,
            summary.deps.clone(),
        )
    }

    /// Returns the dependent test.
    pub fn dependent_test(&self) -> &TestName {
        &self.dependent_test
    }

    /// Returns the outcome the dependencies reproduce.
    pub fn expected_outcome(&self) -> Outcome {
        self.expected_outcome
    }

    /// Returns the dependencies, in execution order.
    pub fn deps(&self) -> &[TestName] {
        &self.deps
    }

    /// Returns the order that runs all dependencies, then the dependent test.
    pub fn order_with_deps(&self) -> ExecutionOrder {
        ExecutionOrder::with_dependent(&self.deps, &[], &self.dependent_test)
    }

    /// Converts this result into its persisted form.
    pub fn to_summary(&self, verification: VerificationSummary) -> MinimizationSummary {
        MinimizationSummary {
            format_version: MINIMIZATION_FORMAT_VERSION,
            dependent_test: self.dependent_test.clone(),
            expected_outcome: self.expected_outcome,
            deps: self.deps.clone(),
            verification,
        }
    }
}

/// The phase of the search that produced a result.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SearchStrategy {
    /// The dependent test reproduced the outcome on its own.
    Isolated,

    /// A single preceding test reproduced the outcome.
    SingleDependency,

    /// Binary search narrowed the candidates down to one test.
    DivideAndConquer,

    /// The candidates were eliminated one by one.
    Sequential,
}

/// Searches for the minimal dependencies of one dependent test.
///
/// Every outcome observed is checked by a [`FlakinessMonitor`] before the search acts on it.
#[derive(Debug)]
pub struct DependencyMinimizer<'a, O: ?Sized> {
    oracle: &'a mut O,
    dependent_test: TestName,
    monitor: FlakinessMonitor,
    oracle_runs: usize,
    strategy: Option<SearchStrategy>,
}

impl<'a, O: ExecutionOracle + ?Sized> DependencyMinimizer<'a, O> {
    /// Creates a new minimizer for `dependent_test`.
    pub fn new(oracle: &'a mut O, dependent_test: TestName) -> Self {
        let monitor = FlakinessMonitor::new(dependent_test.clone());
        Self {
            oracle,
            dependent_test,
            monitor,
            oracle_runs: 0,
            strategy: None,
        }
    }

    /// Returns the dependent test.
    pub fn dependent_test(&self) -> &TestName {
        &self.dependent_test
    }

    /// Returns the flakiness monitor for this session.
    pub fn monitor(&self) -> &FlakinessMonitor {
        &self.monitor
    }

    /// Returns the number of times the oracle has been run.
    pub fn oracle_runs(&self) -> usize {
        self.oracle_runs
    }

    /// Returns the phase that produced the last successful result, if any.
    pub fn strategy(&self) -> Option<SearchStrategy> {
        self.strategy
    }

    /// Returns the oracle, so that it can be reused (e.g. for verification).
    pub fn oracle_mut(&mut self) -> &mut O {
        &mut *self.oracle
    }

    /// Runs `order` up to and including the dependent test, and returns its outcome.
    ///
    /// If the dependent test does not occur in `order`, it is run after all of `order`.
    pub fn observe_outcome(&mut self, order: &ExecutionOrder) -> Result<Outcome, MinimizeError> {
        let before = order.tests_before(&self.dependent_test).to_vec();
        info!(
            test = %self.dependent_test,
            "observing outcome after {} {}",
            before.len(),
            plural::tests_str(before.len()),
        );
        self.run_with(&before, &[])
    }

    /// Finds the minimal dependencies for the dependent test to produce `expected`.
    pub fn minimize(
        &mut self,
        order: &ExecutionOrder,
        expected: Outcome,
    ) -> Result<MinimizationResult, MinimizeError> {
        let candidates = order.tests_before(&self.dependent_test).to_vec();
        info!(
            test = %self.dependent_test,
            %expected,
            "minimizing dependencies among {} {}",
            candidates.len(),
            plural::tests_str(candidates.len()),
        );

        let (strategy, deps) = self.search(&candidates, expected)?;
        self.strategy = Some(strategy);
        info!(
            test = %self.dependent_test,
            ?strategy,
            oracle_runs = self.oracle_runs,
            "found {} {}",
            deps.len(),
            plural::dependencies_str(deps.len()),
        );

        Ok(MinimizationResult::new(
            self.dependent_test.clone(),
            expected,
            deps,
        ))
    }

    fn search(
        &mut self,
        candidates: &[TestName],
        expected: Outcome,
    ) -> Result<(SearchStrategy, Vec<TestName>), MinimizeError> {
        debug!(test = %self.dependent_test, "trying test in isolation");
        let isolated = self.run_with(&[], &[])?;
        if isolated == expected {
            return Ok((SearchStrategy::Isolated, Vec::new()));
        }
        if candidates.is_empty() {
            return Err(MinimizeError::NoCandidates {
                dependent_test: self.dependent_test.clone(),
                expected,
                actual: isolated,
            });
        }

        for (index, candidate) in candidates.iter().enumerate() {
            debug!(
                test = %self.dependent_test,
                %candidate,
                "trying single dependency {} of {}",
                index + 1,
                candidates.len(),
            );
            if self.run_with(&[], slice::from_ref(candidate))? == expected {
                return Ok((SearchStrategy::SingleDependency, vec![candidate.clone()]));
            }
        }

        // Tests known to be required; prefixed to every run. Nothing is confirmed before the
        // halving starts.
        let confirmed: Vec<TestName> = Vec::new();
        let mut remaining = candidates;
        while remaining.len() > 1 {
            let (top, bottom) = remaining.split_at(remaining.len() / 2);
            debug!(
                test = %self.dependent_test,
                "trying both halves, {} {} remaining",
                remaining.len(),
                plural::tests_str(remaining.len()),
            );
            let top_outcome = self.run_with(&confirmed, top)?;
            let bottom_outcome = self.run_with(&confirmed, bottom)?;

            match (top_outcome == expected, bottom_outcome == expected) {
                (true, false) => remaining = top,
                (false, true) => remaining = bottom,
                (top_matches, _) => {
                    let which = if top_matches {
                        "both halves reproduce"
                    } else {
                        "neither half reproduces"
                    };
                    warn!(
                        test = %self.dependent_test,
                        %top_outcome,
                        %bottom_outcome,
                        "{which} {expected}: either the dependencies span both halves, or the \
                         test is flaky; eliminating {} {} one at a time",
                        remaining.len(),
                        plural::tests_str(remaining.len()),
                    );
                    let deps = self.run_sequential(confirmed, remaining, expected)?;
                    return Ok((SearchStrategy::Sequential, deps));
                }
            }
        }

        let [candidate] = remaining else {
            // `candidates` is non-empty and both halves of a split are non-empty, so exactly one
            // candidate is left here.
            return Err(MinimizeError::NoCandidates {
                dependent_test: self.dependent_test.clone(),
                expected,
                actual: isolated,
            });
        };
        let actual = self.run_with(&confirmed, slice::from_ref(candidate))?;
        if actual != expected {
            return Err(MinimizeError::SearchInvariant {
                dependent_test: self.dependent_test.clone(),
                candidate: candidate.clone(),
                expected,
                actual,
            });
        }

        let mut deps = confirmed;
        deps.push(candidate.clone());
        Ok((SearchStrategy::DivideAndConquer, deps))
    }

    fn run_sequential(
        &mut self,
        mut confirmed: Vec<TestName>,
        remaining: &[TestName],
        expected: Outcome,
    ) -> Result<Vec<TestName>, MinimizeError> {
        for (index, current) in remaining.iter().enumerate() {
            let unprocessed = &remaining[index + 1..];
            debug!(
                test = %self.dependent_test,
                %current,
                "trying without candidate, {} left",
                unprocessed.len(),
            );
            let outcome = self.run_with(&confirmed, unprocessed)?;
            if outcome != expected {
                debug!(test = %self.dependent_test, dependency = %current, "found dependency");
                confirmed.push(current.clone());
            }
        }
        Ok(confirmed)
    }

    /// Runs `prefix ++ middle ++ [dependent test]` and returns the checked outcome.
    fn run_with(
        &mut self,
        prefix: &[TestName],
        middle: &[TestName],
    ) -> Result<Outcome, MinimizeError> {
        let order = ExecutionOrder::with_dependent(prefix, middle, &self.dependent_test);
        let execution = self.oracle.run_watching(&order, &self.dependent_test)?;
        self.oracle_runs += 1;
        debug!(
            test = %self.dependent_test,
            %order,
            outcome = %execution.outcome,
            duration = ?execution.duration,
            "oracle run finished",
        );
        self.monitor
            .update_with(&order, execution.outcome, execution.duration)?;
        Ok(execution.outcome)
    }
}
