// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flakiness detection for a single dependent test.
//!
//! During a search the same execution prefix is often run more than once. A deterministic test
//! must produce the same outcome every time; a [`FlakinessMonitor`] checks that.

use crate::{errors::FlakyTestError, order::ExecutionOrder};
use depmin_metadata::{Outcome, TestName};
use std::{collections::HashMap, time::Duration};
use tracing::{trace, warn};

/// Durations observed for a dependent test across oracle runs.
#[derive(Clone, Debug, Default)]
pub struct TimingRecord {
    durations: Vec<Duration>,
}

impl TimingRecord {
    /// Records a new duration.
    pub fn push(&mut self, duration: Duration) {
        self.durations.push(duration);
    }

    /// Returns the number of recorded durations.
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    /// Returns the average of the recorded durations, or `None` if nothing was recorded.
    pub fn average(&self) -> Option<Duration> {
        if self.durations.is_empty() {
            return None;
        }
        let total: Duration = self.durations.iter().sum();
        let count = u32::try_from(self.durations.len()).unwrap_or(u32::MAX);
        Some(total / count)
    }
}

/// Tracks the outcomes of a dependent test across runs, keyed by execution prefix.
///
/// A monitor lives for one minimization session.
#[derive(Clone, Debug)]
pub struct FlakinessMonitor {
    test: TestName,
    known_runs: HashMap<ExecutionOrder, Outcome>,
    is_flaky: bool,
    timing: TimingRecord,
}

impl FlakinessMonitor {
    /// Creates a new monitor for `test`.
    pub fn new(test: TestName) -> Self {
        Self {
            test,
            known_runs: HashMap::new(),
            is_flaky: false,
            timing: TimingRecord::default(),
        }
    }

    /// Returns the test being monitored.
    pub fn test(&self) -> &TestName {
        &self.test
    }

    /// Returns true if a contradiction has been observed.
    pub fn is_flaky(&self) -> bool {
        self.is_flaky
    }

    /// Returns the durations observed so far.
    pub fn timing(&self) -> &TimingRecord {
        &self.timing
    }

    /// Records the outcome of the monitored test after running `order`.
    ///
    /// Returns an error the first time the same prefix (`order` up to and including the test)
    /// produces two different outcomes. Later contradictions are recorded without an error.
    pub fn update_with(
        &mut self,
        order: &ExecutionOrder,
        outcome: Outcome,
        duration: Duration,
    ) -> Result<(), FlakyTestError> {
        self.timing.push(duration);

        let prefix = order.prefix_through(&self.test);
        if let Some(&previous) = self.known_runs.get(&prefix)
            && previous != outcome
            && !self.is_flaky
        {
            self.is_flaky = true;
            warn!(
                test = %self.test,
                %previous,
                new = %outcome,
                "test is flaky: same prefix produced different outcomes",
            );
            // The first observation stays recorded.
            return Err(FlakyTestError::new(
                self.test.clone(),
                previous,
                outcome,
                prefix,
            ));
        }

        trace!(test = %self.test, %prefix, %outcome, "recording outcome");
        self.known_runs.insert(prefix, outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> FlakinessMonitor {
        FlakinessMonitor::new("t".into())
    }

    #[test]
    fn consistent_outcomes() {
        let mut monitor = monitor();
        let order = ExecutionOrder::new(["a", "t"]);
        for _ in 0..3 {
            monitor
                .update_with(&order, Outcome::Fail, Duration::ZERO)
                .expect("consistent outcome");
        }
        assert!(!monitor.is_flaky());
    }

    #[test]
    fn raised_exactly_once() {
        let mut monitor = monitor();
        let order = ExecutionOrder::new(["a", "t"]);

        monitor
            .update_with(&order, Outcome::Pass, Duration::ZERO)
            .expect("first observation");
        let error = monitor
            .update_with(&order, Outcome::Fail, Duration::ZERO)
            .expect_err("contradiction is raised");
        assert_eq!(error.test().as_str(), "t");
        assert_eq!(error.previous_outcome(), Outcome::Pass);
        assert_eq!(error.new_outcome(), Outcome::Fail);
        assert_eq!(error.prefix(), &order);
        assert!(monitor.is_flaky());

        // A third, different outcome is recorded silently.
        monitor
            .update_with(&order, Outcome::Error, Duration::ZERO)
            .expect("already flaky, not raised again");
        assert!(monitor.is_flaky());
    }

    #[test]
    fn prefix_ignores_tests_after_dependent() {
        let mut monitor = monitor();
        monitor
            .update_with(&ExecutionOrder::new(["a", "t", "b"]), Outcome::Pass, Duration::ZERO)
            .expect("first observation");
        let error = monitor
            .update_with(&ExecutionOrder::new(["a", "t", "c"]), Outcome::Fail, Duration::ZERO)
            .expect_err("same prefix [a, t]");
        assert_eq!(error.prefix(), &ExecutionOrder::new(["a", "t"]));
    }

    #[test]
    fn different_prefixes_are_independent() {
        let mut monitor = monitor();
        monitor
            .update_with(&ExecutionOrder::new(["t"]), Outcome::Pass, Duration::ZERO)
            .expect("first prefix");
        monitor
            .update_with(&ExecutionOrder::new(["a", "t"]), Outcome::Fail, Duration::ZERO)
            .expect("different prefix");
        assert!(!monitor.is_flaky());
    }

    #[test]
    fn timing_average() {
        let mut monitor = monitor();
        assert_eq!(monitor.timing().average(), None);

        let order = ExecutionOrder::new(["t"]);
        for millis in [100, 200, 600] {
            monitor
                .update_with(&order, Outcome::Pass, Duration::from_millis(millis))
                .expect("consistent outcome");
        }
        assert_eq!(monitor.timing().len(), 3);
        assert_eq!(monitor.timing().average(), Some(Duration::from_millis(300)));
    }
}
