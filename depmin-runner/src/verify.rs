// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statistical confirmation of minimization results.
//!
//! A [`MinimizationVerifier`] re-runs a result several times. In every round it checks that:
//!
//! * the dependencies are sufficient: running them before the dependent test reproduces the
//!   expected outcome,
//! * the dependencies are necessary: the dependent test alone does not produce it,
//! * the dependencies are minimal: no strict sub-sequence of them produces it.
//!
//! A dependency list with `n` entries has `2^n - 2` non-empty strict sub-sequences (the empty one
//! is the isolation check). If that is more than the configured cap, a uniform random sample of
//! the cap's size is checked instead, redrawn every round.

use crate::{
    errors::VerifyError, minimize::MinimizationResult, oracle::ExecutionOracle,
    order::ExecutionOrder,
};
use depmin_metadata::{Outcome, TestName};
use rand::{prelude::*, rngs::StdRng, seq::index};
use std::collections::HashSet;
use tracing::{debug, info};

/// The default number of verification rounds.
pub const DEFAULT_ROUNDS: u32 = 10;

/// The default cap on sub-sequences checked per round.
pub const DEFAULT_MAX_SUBSEQUENCE_SAMPLES: usize = 1000;

/// Confirms that minimization results are sufficient and minimal.
#[derive(Debug)]
pub struct MinimizationVerifier {
    rounds: u32,
    max_subsequence_samples: usize,
    rng: StdRng,
}

impl MinimizationVerifier {
    /// Creates a new verifier that samples sub-sequences with `rng`.
    pub fn new(rounds: u32, max_subsequence_samples: usize, rng: StdRng) -> Self {
        Self {
            rounds,
            max_subsequence_samples,
            rng,
        }
    }

    /// Creates a new verifier with a seeded random number generator.
    pub fn from_seed(rounds: u32, max_subsequence_samples: usize, seed: u64) -> Self {
        Self::new(rounds, max_subsequence_samples, StdRng::seed_from_u64(seed))
    }

    /// Returns the number of rounds each result is checked for.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Verifies `result` against `oracle`, failing at the first check that doesn't hold.
    pub fn verify<O: ExecutionOracle + ?Sized>(
        &mut self,
        result: &MinimizationResult,
        oracle: &mut O,
    ) -> Result<(), VerifyError> {
        let test = result.dependent_test();
        let expected = result.expected_outcome();
        let deps = result.deps();

        for round in 1..=self.rounds {
            info!(%test, "verification round {round} of {}", self.rounds);

            let actual = run_with(oracle, deps, test)?;
            if actual != expected {
                return Err(VerifyError::NotSufficient {
                    round,
                    expected,
                    actual,
                });
            }

            if deps.is_empty() {
                continue;
            }

            if run_with(oracle, &[], test)? == expected {
                return Err(VerifyError::NotNecessaryAtAll { round, expected });
            }

            let subsequences = self.sample_subsequences(deps);
            let total = subsequences.len();
            for (index, subsequence) in subsequences.into_iter().enumerate() {
                debug!(
                    %test,
                    "round {round} of {}, check {} of {total}",
                    self.rounds,
                    index + 1,
                );
                if run_with(oracle, &subsequence, test)? == expected {
                    return Err(VerifyError::NotMinimal {
                        round,
                        expected,
                        subsequence,
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns the non-empty strict sub-sequences of `deps` to check in one round.
    ///
    /// All of them are returned if there are at most `max_subsequence_samples`, and otherwise a
    /// uniform sample without replacement. Neither the empty sub-sequence nor `deps` itself is
    /// included.
    pub fn sample_subsequences(&mut self, deps: &[TestName]) -> Vec<Vec<TestName>> {
        // Masks 1..=count, excluding 0 (empty) and 2^n - 1 (all of deps).
        let count = u32::try_from(deps.len())
            .ok()
            .and_then(|len| 1usize.checked_shl(len))
            .map(|all| all.saturating_sub(2));

        match count {
            Some(count) if count <= self.max_subsequence_samples => {
                (1..=count).map(|mask| select(deps, mask)).collect()
            }
            Some(count) => {
                let mut masks =
                    index::sample(&mut self.rng, count, self.max_subsequence_samples).into_vec();
                masks.sort_unstable();
                masks
                    .into_iter()
                    .map(|index| select(deps, index + 1))
                    .collect()
            }
            None => self.sample_large(deps),
        }
    }

    /// Sampling for dependency lists too long for their sub-sequences to be indexed by `usize`.
    fn sample_large(&mut self, deps: &[TestName]) -> Vec<Vec<TestName>> {
        let mut seen = HashSet::with_capacity(self.max_subsequence_samples);
        let mut samples = Vec::with_capacity(self.max_subsequence_samples);
        while samples.len() < self.max_subsequence_samples {
            let included: Vec<bool> = deps.iter().map(|_| self.rng.random::<bool>()).collect();
            if included.iter().all(|&b| b)
                || !included.contains(&true)
                || !seen.insert(included.clone())
            {
                continue;
            }
            samples.push(
                deps.iter()
                    .zip(&included)
                    .filter(|&(_, &b)| b)
                    .map(|(test, _)| test.clone())
                    .collect(),
            );
        }
        samples
    }
}

/// Returns the sub-sequence of `deps` selected by the bits of `mask`.
fn select(deps: &[TestName], mask: usize) -> Vec<TestName> {
    deps.iter()
        .enumerate()
        .filter(|&(index, _)| mask & (1 << index) != 0)
        .map(|(_, test)| test.clone())
        .collect()
}

fn run_with<O: ExecutionOracle + ?Sized>(
    oracle: &mut O,
    deps: &[TestName],
    test: &TestName,
) -> Result<Outcome, VerifyError> {
    let order = ExecutionOrder::with_dependent(deps, &[], test);
    let execution = oracle.run_watching(&order, test)?;
    debug!(%test, %order, outcome = %execution.outcome, "verification run finished");
    Ok(execution.outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeOracle, test_names};
    use pretty_assertions::assert_eq;
    use test_strategy::proptest;

    fn result(deps: &[&str], expected: Outcome) -> MinimizationResult {
        MinimizationResult::new(
            "t".into(),
            expected,
            deps.iter().copied().map(TestName::new).collect(),
        )
    }

    fn verifier(rounds: u32) -> MinimizationVerifier {
        MinimizationVerifier::from_seed(rounds, DEFAULT_MAX_SUBSEQUENCE_SAMPLES, 42)
    }

    #[test]
    fn verifies_minimal_deps() {
        let mut oracle = FakeOracle::requiring("t", &["a", "c"], Outcome::Fail, Outcome::Pass);
        verifier(3)
            .verify(&result(&["a", "c"], Outcome::Fail), &mut oracle)
            .expect("deps are sufficient and minimal");
        // Per round: sufficiency, isolation, then [a] and [c].
        assert_eq!(oracle.runs().len(), 3 * 4);
    }

    #[test]
    fn empty_deps_only_check_sufficiency() {
        let mut oracle = FakeOracle::new("t", |_| Outcome::Pass);
        verifier(DEFAULT_ROUNDS)
            .verify(&result(&[], Outcome::Pass), &mut oracle)
            .expect("test passes in isolation");
        assert_eq!(oracle.runs().len(), DEFAULT_ROUNDS as usize);
    }

    #[test]
    fn not_sufficient() {
        let mut oracle = FakeOracle::new("t", |_| Outcome::Pass);
        let error = verifier(3)
            .verify(&result(&["a"], Outcome::Fail), &mut oracle)
            .expect_err("a does not cause the failure");
        assert!(
            matches!(
                error,
                VerifyError::NotSufficient {
                    round: 1,
                    expected: Outcome::Fail,
                    actual: Outcome::Pass,
                }
            ),
            "unexpected error: {error:?}"
        );
        assert!(error.is_failed_check());
    }

    #[test]
    fn not_necessary_at_all() {
        let mut oracle = FakeOracle::new("t", |_| Outcome::Fail);
        let error = verifier(3)
            .verify(&result(&["a"], Outcome::Fail), &mut oracle)
            .expect_err("t fails on its own");
        assert!(
            matches!(error, VerifyError::NotNecessaryAtAll { round: 1, .. }),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn not_minimal() {
        let mut oracle = FakeOracle::requiring("t", &["a"], Outcome::Fail, Outcome::Pass);
        let error = verifier(3)
            .verify(&result(&["a", "b"], Outcome::Fail), &mut oracle)
            .expect_err("b is not needed");
        match error {
            VerifyError::NotMinimal {
                round, subsequence, ..
            } => {
                assert_eq!(round, 1);
                assert_eq!(subsequence, vec![TestName::new("a")]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failure_in_later_round() {
        // Sufficient for the first round, then the dependency stops working.
        let mut runs = 0;
        let mut oracle = FakeOracle::new("t", move |prefix| {
            runs += 1;
            if !prefix.is_empty() && runs <= 2 {
                Outcome::Fail
            } else {
                Outcome::Pass
            }
        });
        let error = verifier(3)
            .verify(&result(&["a"], Outcome::Fail), &mut oracle)
            .expect_err("second round fails");
        assert!(
            matches!(error, VerifyError::NotSufficient { round: 2, .. }),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn oracle_error_is_not_a_failed_check() {
        let mut oracle =
            FakeOracle::requiring("t", &["a"], Outcome::Fail, Outcome::Pass).fail_on_run(2);
        let error = verifier(3)
            .verify(&result(&["a"], Outcome::Fail), &mut oracle)
            .expect_err("oracle fails");
        assert!(matches!(error, VerifyError::Oracle(_)), "{error:?}");
        assert!(!error.is_failed_check());
    }

    #[test]
    fn exhaustive_subsequences() {
        let deps = test_names(3);
        let subsequences = verifier(1).sample_subsequences(&deps);
        let expected: Vec<Vec<TestName>> = vec![
            vec!["t0".into()],
            vec!["t1".into()],
            vec!["t0".into(), "t1".into()],
            vec!["t2".into()],
            vec!["t0".into(), "t2".into()],
            vec!["t1".into(), "t2".into()],
        ];
        assert_eq!(subsequences, expected);
    }

    #[test]
    fn sampled_subsequences_are_seeded() {
        // 2^11 - 2 = 2046 non-empty strict sub-sequences, more than the cap.
        let deps = test_names(11);
        let first = verifier(1).sample_subsequences(&deps);
        let second = verifier(1).sample_subsequences(&deps);
        assert_eq!(first.len(), DEFAULT_MAX_SUBSEQUENCE_SAMPLES);
        assert_eq!(first, second, "same seed, same sample");

        let mut redrawn = verifier(1);
        let round_1 = redrawn.sample_subsequences(&deps);
        let round_2 = redrawn.sample_subsequences(&deps);
        assert_ne!(round_1, round_2, "each round draws a new sample");
    }

    #[test]
    fn sampling_very_long_deps() {
        let deps = test_names(70);
        let mut verifier = MinimizationVerifier::from_seed(1, 20, 7);
        let subsequences = verifier.sample_subsequences(&deps);
        assert_eq!(subsequences.len(), 20);
        let distinct: HashSet<_> = subsequences.iter().collect();
        assert_eq!(distinct.len(), 20);
        assert!(
            subsequences
                .iter()
                .all(|s| !s.is_empty() && s.len() < deps.len())
        );
    }

    #[test]
    fn sample_spends_cap_on_non_empty_subsequences() {
        // 2^4 - 2 = 14 candidates, capped at 13: every draw must be a real check.
        let deps = test_names(4);
        for seed in 0..64 {
            let mut verifier = MinimizationVerifier::from_seed(1, 13, seed);
            let subsequences = verifier.sample_subsequences(&deps);
            assert_eq!(subsequences.len(), 13, "seed {seed}");
            assert!(
                subsequences.iter().all(|s| !s.is_empty()),
                "seed {seed}: {subsequences:?}"
            );
        }

        // One round checks sufficiency, isolation, then the full cap of sub-sequences.
        let mut oracle = FakeOracle::requiring(
            "t",
            &["t0", "t1", "t2", "t3"],
            Outcome::Fail,
            Outcome::Pass,
        );
        MinimizationVerifier::from_seed(1, 13, 3)
            .verify(
                &MinimizationResult::new("t".into(), Outcome::Fail, deps.clone()),
                &mut oracle,
            )
            .expect("all four deps are needed");
        assert_eq!(oracle.runs().len(), 2 + 13);
    }

    #[proptest(cases = 64)]
    fn subsequences_are_strict_and_distinct(
        #[strategy(0usize..=12)] len: usize,
        #[strategy(1usize..=3000)] cap: usize,
        seed: u64,
    ) {
        let deps = test_names(len);
        let mut verifier = MinimizationVerifier::from_seed(1, cap, seed);
        let subsequences = verifier.sample_subsequences(&deps);

        let count = (1usize << len).saturating_sub(2);
        assert_eq!(subsequences.len(), count.min(cap));

        let distinct: HashSet<_> = subsequences.iter().collect();
        assert_eq!(distinct.len(), subsequences.len());
        for subsequence in &subsequences {
            assert!(!subsequence.is_empty());
            assert!(subsequence.len() < deps.len());
            let mut remaining = deps.iter();
            assert!(
                subsequence
                    .iter()
                    .all(|test| remaining.any(|candidate| candidate == test)),
                "{subsequence:?} preserves the order of {deps:?}"
            );
        }
    }
}
