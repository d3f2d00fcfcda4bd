// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::OutcomeParseError;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{borrow::Borrow, collections::BTreeMap, fmt, str::FromStr};

/// The current version of the persisted minimization record format.
///
/// Records with a higher version are rejected when loading.
pub const MINIMIZATION_FORMAT_VERSION: u32 = 1;

/// The unique name of a test, as understood by the test executor.
///
/// Test names are opaque to depmin: they are only compared, hashed and passed back to the
/// executor.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestName(SmolStr);

impl TestName {
    /// Creates a new `TestName`.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name))
    }

    /// Returns the name as a string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TestName {
    fn from(s: String) -> Self {
        Self(SmolStr::from(s))
    }
}

impl Borrow<str> for TestName {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

/// The categorical result of running a single test.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    /// The test passed.
    Pass,
    /// The test failed an assertion.
    Fail,
    /// The test errored out (e.g. threw an unexpected exception).
    Error,
}

impl Outcome {
    /// Returns the string representations of all known outcomes.
    pub fn variants() -> [&'static str; 3] {
        ["PASS", "FAIL", "ERROR"]
    }

    /// Returns the string representation of this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Error => "ERROR",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = OutcomeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let outcome = match s.to_ascii_uppercase().as_str() {
            "PASS" => Outcome::Pass,
            "FAIL" => Outcome::Fail,
            "ERROR" => Outcome::Error,
            _ => return Err(OutcomeParseError::new(s)),
        };
        Ok(outcome)
    }
}

/// A persisted minimization record for one `(dependent test, expected outcome)` pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MinimizationSummary {
    /// The version of the record format.
    pub format_version: u32,

    /// The test whose outcome depends on the tests that run before it.
    pub dependent_test: TestName,

    /// The outcome the dependencies reproduce.
    pub expected_outcome: Outcome,

    /// The minimal dependencies, in execution order. Empty if the test produces the expected
    /// outcome in isolation.
    pub deps: Vec<TestName>,

    /// Whether the dependencies were statistically confirmed.
    pub verification: VerificationSummary,
}

/// The verification status of a persisted minimization record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum VerificationSummary {
    /// The dependencies were confirmed to be sufficient and minimal.
    Verified {
        /// The number of verification rounds that succeeded.
        rounds: u32,
    },

    /// The search found dependencies, but they could not be confirmed.
    Unverified {
        /// A description of the failed check.
        reason: String,
    },

    /// Verification was disabled for this run.
    Skipped,
}

impl VerificationSummary {
    /// Returns true if the record was verified.
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationSummary::Verified { .. })
    }
}

/// A marker recorded for a test observed to be flaky during minimization.
///
/// Tests with a flaky marker are skipped by later minimization runs until the marker is removed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FlakySummary {
    /// The flaky test.
    pub test: TestName,

    /// The outcome first observed for `prefix`.
    pub previous_outcome: Outcome,

    /// The contradicting outcome observed later for the same `prefix`.
    pub new_outcome: Outcome,

    /// The execution order, up to and including `test`, that produced both outcomes.
    pub prefix: Vec<TestName>,
}

/// A single dependent test reported by an order-dependency detector.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependentTestSpec {
    /// The execution order in which the dependent test was observed.
    pub order: Vec<TestName>,

    /// The test whose outcome depends on the order.
    pub dependent_test: TestName,

    /// The outcome observed when running `order`. If absent, it is observed again by running the
    /// full order once.
    #[serde(default)]
    pub expected_outcome: Option<Outcome>,
}

/// A list of dependent tests, as produced by an order-dependency detector.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependentTestList {
    /// The dependent tests to minimize, in the order they should be processed.
    pub dependent_tests: Vec<DependentTestSpec>,
}

/// A request sent to an external test executor: run `order`, report outcomes for `watch`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OracleRequest {
    /// The tests to run, sequentially and in this order.
    pub order: Vec<TestName>,

    /// The tests whose outcomes must be reported.
    pub watch: Vec<TestName>,
}

/// The response from an external test executor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OracleResponse {
    /// Per-test results. Must contain every watched test; may contain others.
    pub results: BTreeMap<TestName, TestExecutionSummary>,
}

/// The result of executing one test, as reported by an external test executor.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestExecutionSummary {
    /// The outcome of the test.
    pub outcome: Outcome,

    /// How long the test took to run, in seconds.
    #[serde(default)]
    pub duration_secs: f64,
}
