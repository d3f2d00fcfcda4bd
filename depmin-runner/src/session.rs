// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimization sessions: one dependent test at a time, or a whole list of them.

use crate::{
    config::MinimizerConfig,
    errors::{DisplayErrorChain, SessionError, VerifyError},
    minimize::DependencyMinimizer,
    oracle::ExecutionOracle,
    order::ExecutionOrder,
    store::{CacheStatus, ResultKey, ResultStore, result_for},
    verify::MinimizationVerifier,
};
use camino::Utf8PathBuf;
use depmin_metadata::{
    DependentTestList, DependentTestSpec, MinimizationSummary, TestName, VerificationSummary,
};
use std::{collections::BTreeSet, fmt};
use tracing::{error, info, warn};

/// Options for a [`BatchMinimizer`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchOptions {
    /// The number of verification rounds.
    pub rounds: u32,

    /// The maximum number of sub-sequences checked per verification round.
    pub max_subsequence_samples: usize,

    /// Whether to verify search results.
    pub verify: bool,

    /// The sampling seed. A random seed is chosen if `None`.
    pub seed: Option<u64>,

    /// Recompute results even if a record is already stored.
    pub force: bool,
}

impl BatchOptions {
    /// Creates options from the minimizer config.
    pub fn from_config(config: &MinimizerConfig) -> Self {
        Self {
            rounds: config.rounds,
            max_subsequence_samples: config.max_subsequence_samples,
            verify: config.verify,
            seed: config.seed,
            force: false,
        }
    }
}

/// Why a dependent test was not minimized.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The test was found to be flaky earlier in this batch.
    FlakyInBatch,

    /// A flaky marker was recorded for the test by an earlier run.
    FlakyMarker {
        /// The marker file.
        path: Utf8PathBuf,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FlakyInBatch => write!(f, "found to be flaky earlier in this batch"),
            SkipReason::FlakyMarker { path } => write!(f, "flaky marker at `{path}`"),
        }
    }
}

/// The result of a session for one dependent test.
#[derive(Clone, Debug)]
pub enum SessionOutcome {
    /// A record is available for the test.
    Minimized {
        /// The record.
        summary: MinimizationSummary,

        /// Whether the record was loaded or computed.
        status: CacheStatus,

        /// Where the record is stored.
        path: Utf8PathBuf,
    },

    /// The test was skipped.
    Skipped {
        /// The dependent test.
        test: TestName,

        /// Why the test was skipped.
        reason: SkipReason,
    },
}

/// Minimizes a list of dependent tests, one at a time, against a single oracle.
#[derive(Debug)]
pub struct BatchMinimizer<'a, O: ?Sized> {
    oracle: &'a mut O,
    store: &'a ResultStore,
    verifier: MinimizationVerifier,
    options: BatchOptions,
    seed: u64,
    excluded: BTreeSet<TestName>,
}

impl<'a, O: ExecutionOracle + ?Sized> BatchMinimizer<'a, O> {
    /// Creates a new batch minimizer.
    pub fn new(oracle: &'a mut O, store: &'a ResultStore, options: BatchOptions) -> Self {
        let seed = match options.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::random::<u64>();
                info!("using random seed {seed} for sub-sequence sampling");
                seed
            }
        };
        let verifier =
            MinimizationVerifier::from_seed(options.rounds, options.max_subsequence_samples, seed);
        Self {
            oracle,
            store,
            verifier,
            options,
            seed,
            excluded: BTreeSet::new(),
        }
    }

    /// Returns the seed used for sub-sequence sampling.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the tests found to be flaky so far. They are skipped for the rest of the batch.
    pub fn excluded(&self) -> &BTreeSet<TestName> {
        &self.excluded
    }

    /// Minimizes (or loads) the dependencies of one dependent test.
    ///
    /// If the test turns out to be flaky, a marker is recorded and the test is excluded from the
    /// rest of the batch.
    pub fn run_one(&mut self, spec: &DependentTestSpec) -> Result<SessionOutcome, SessionError> {
        let test = &spec.dependent_test;
        if self.excluded.contains(test) {
            info!(%test, "skipping test found to be flaky earlier in this batch");
            return Ok(SessionOutcome::Skipped {
                test: test.clone(),
                reason: SkipReason::FlakyInBatch,
            });
        }
        if self.store.flaky_marker(test)?.is_some() {
            let path = self.store.flaky_marker_path(test);
            info!(%test, %path, "skipping test with a flaky marker");
            return Ok(SessionOutcome::Skipped {
                test: test.clone(),
                reason: SkipReason::FlakyMarker { path },
            });
        }

        let result = self.run_session(spec);
        if let Err(error) = &result
            && let Some(flaky) = error.as_flaky()
        {
            self.store.record_flaky(flaky)?;
            self.excluded.insert(flaky.test().clone());
        }
        result
    }

    fn run_session(&mut self, spec: &DependentTestSpec) -> Result<SessionOutcome, SessionError> {
        let Self {
            oracle,
            store,
            verifier,
            options,
            ..
        } = self;
        let order = ExecutionOrder::from(spec.order.clone());
        let mut minimizer = DependencyMinimizer::new(&mut **oracle, spec.dependent_test.clone());

        let expected = match spec.expected_outcome {
            Some(expected) => expected,
            None => minimizer.observe_outcome(&order)?,
        };
        let key = ResultKey::new(spec.dependent_test.clone(), expected);

        let _lock = store.lock_key(&key)?;
        let (summary, status) = result_for(
            &key,
            |key| {
                if options.force {
                    Ok(None)
                } else {
                    store.load(key).map_err(SessionError::from)
                }
            },
            |key| {
                let result = minimizer.minimize(&order, key.expected_outcome())?;
                if let Some(average) = minimizer.monitor().timing().average() {
                    info!(
                        test = %key.dependent_test(),
                        oracle_runs = minimizer.oracle_runs(),
                        "average duration of dependent test: {average:?}",
                    );
                }

                let verification = if options.verify {
                    match verifier.verify(&result, minimizer.oracle_mut()) {
                        Ok(()) => VerificationSummary::Verified {
                            rounds: verifier.rounds(),
                        },
                        Err(VerifyError::Oracle(error)) => {
                            return Err(SessionError::VerifyOracle(error));
                        }
                        Err(error) => {
                            warn!(
                                test = %key.dependent_test(),
                                "result could not be verified: {error}",
                            );
                            VerificationSummary::Unverified {
                                reason: error.to_string(),
                            }
                        }
                    }
                } else {
                    VerificationSummary::Skipped
                };
                Ok(result.to_summary(verification))
            },
            |_, summary| store.save(summary).map(|_| ()).map_err(SessionError::from),
        )?;

        if status == CacheStatus::Loaded {
            info!(test = %key.dependent_test(), "using stored record");
        }
        Ok(SessionOutcome::Minimized {
            summary,
            status,
            path: store.record_path(&key),
        })
    }

    /// Runs a session for each test in `list`. Failures are logged and collected, and don't stop
    /// the batch.
    pub fn run_all(&mut self, list: &DependentTestList) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let total = list.dependent_tests.len();

        for (index, spec) in list.dependent_tests.iter().enumerate() {
            let test = spec.dependent_test.clone();
            info!(%test, "minimizing dependent test {} of {total}", index + 1);

            match self.run_one(spec) {
                Ok(SessionOutcome::Minimized { summary: record, .. }) => match &record.verification
                {
                    VerificationSummary::Verified { .. } => summary.verified.push(record),
                    VerificationSummary::Unverified { .. } => summary.unverified.push(record),
                    VerificationSummary::Skipped => summary.unchecked.push(record),
                },
                Ok(SessionOutcome::Skipped { test, reason }) => {
                    summary.skipped.push((test, reason))
                }
                Err(error) if error.as_flaky().is_some() => summary.flaky.push(test),
                Err(error) => {
                    error!(%test, "{}", DisplayErrorChain::new(&error));
                    summary.failed.push((test, error));
                }
            }
        }

        summary
    }
}

/// The results of a [`BatchMinimizer::run_all`] call.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Records that were verified.
    pub verified: Vec<MinimizationSummary>,

    /// Records whose verification failed.
    pub unverified: Vec<MinimizationSummary>,

    /// Records written with verification turned off.
    pub unchecked: Vec<MinimizationSummary>,

    /// Tests found to be flaky during this batch.
    pub flaky: Vec<TestName>,

    /// Tests skipped because they were known to be flaky, and why.
    pub skipped: Vec<(TestName, SkipReason)>,

    /// Tests whose sessions failed.
    pub failed: Vec<(TestName, SessionError)>,
}

impl BatchSummary {
    /// Returns true if every dependent test has a record that wasn't contradicted.
    pub fn is_success(&self) -> bool {
        self.unverified.is_empty()
            && self.flaky.is_empty()
            && self.skipped.is_empty()
            && self.failed.is_empty()
    }
}
