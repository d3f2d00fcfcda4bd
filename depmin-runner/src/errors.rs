// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by depmin.

use crate::order::ExecutionOrder;
use camino::Utf8PathBuf;
use depmin_metadata::{Outcome, TestName};
use itertools::Itertools;
use std::{error, io, time::Duration};
use thiserror::Error;

pub use display_error_chain::DisplayErrorChain;

/// An error returned by an [`ExecutionOracle`](crate::oracle::ExecutionOracle).
///
/// Oracle errors abort the current query. They are never retried by depmin.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The tests could not be run: an environment or setup failure.
    #[error("failed to run tests: {message}")]
    Execution {
        /// A description of the failure.
        message: String,

        /// The underlying error, if any.
        #[source]
        source: Option<Box<dyn error::Error + Send + Sync>>,
    },

    /// The test run did not complete within its time budget.
    #[error("test run timed out after {timeout:?}")]
    Timeout {
        /// The time budget that was exceeded.
        timeout: Duration,
    },
}

impl OracleError {
    /// Creates an execution error with a message.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an execution error with a message and an underlying cause.
    pub fn execution_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn missing_outcome(test: &TestName, order_len: usize) -> Self {
        Self::execution(format!(
            "no outcome reported for watched test `{test}` after running {order_len} tests"
        ))
    }
}

/// A test produced two different outcomes for the same execution prefix.
#[derive(Clone, Debug, Error)]
#[error(
    "test `{test}` is flaky: got {new_outcome} after previously getting {previous_outcome} \
     for the same order of {} tests",
    .prefix.len()
)]
pub struct FlakyTestError {
    test: TestName,
    previous_outcome: Outcome,
    new_outcome: Outcome,
    prefix: ExecutionOrder,
}

impl FlakyTestError {
    pub(crate) fn new(
        test: TestName,
        previous_outcome: Outcome,
        new_outcome: Outcome,
        prefix: ExecutionOrder,
    ) -> Self {
        Self {
            test,
            previous_outcome,
            new_outcome,
            prefix,
        }
    }

    /// Returns the flaky test.
    pub fn test(&self) -> &TestName {
        &self.test
    }

    /// Returns the outcome first recorded for the prefix.
    pub fn previous_outcome(&self) -> Outcome {
        self.previous_outcome
    }

    /// Returns the contradicting outcome.
    pub fn new_outcome(&self) -> Outcome {
        self.new_outcome
    }

    /// Returns the execution prefix, up to and including the flaky test.
    pub fn prefix(&self) -> &ExecutionOrder {
        &self.prefix
    }
}

/// An error that occurred while searching for the dependencies of a test.
///
/// None of these errors leave a persisted result behind.
#[derive(Debug, Error)]
pub enum MinimizeError {
    /// The oracle failed.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// The dependent test was observed to be flaky.
    #[error(transparent)]
    Flaky(#[from] FlakyTestError),

    /// Divide and conquer narrowed the candidates down to one test, but that test does not
    /// reproduce the expected outcome.
    ///
    /// This usually indicates flakiness, or a dependency pattern that binary search cannot
    /// reduce.
    #[error(
        "could not find dependencies for `{dependent_test}`: only `{candidate}` is left, \
         but running it produced {actual} instead of {expected}"
    )]
    SearchInvariant {
        /// The dependent test.
        dependent_test: TestName,
        /// The last remaining candidate.
        candidate: TestName,
        /// The outcome that was being reproduced.
        expected: Outcome,
        /// The outcome actually observed.
        actual: Outcome,
    },

    /// No tests run before the dependent test, and it does not produce the expected outcome in
    /// isolation.
    #[error(
        "no tests run before `{dependent_test}`, but in isolation it produced {actual} \
         instead of {expected}"
    )]
    NoCandidates {
        /// The dependent test.
        dependent_test: TestName,
        /// The outcome that was being reproduced.
        expected: Outcome,
        /// The outcome observed in isolation.
        actual: Outcome,
    },
}

impl MinimizeError {
    /// Returns the flakiness report if this error was caused by a flaky test.
    pub fn as_flaky(&self) -> Option<&FlakyTestError> {
        match self {
            MinimizeError::Flaky(error) => Some(error),
            MinimizeError::Oracle(_)
            | MinimizeError::SearchInvariant { .. }
            | MinimizeError::NoCandidates { .. } => None,
        }
    }
}

/// An error that occurred while verifying a minimization result.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Running the dependent test with all of its dependencies did not reproduce the expected
    /// outcome.
    #[error("round {round}: got {actual} when running with all dependencies, expected {expected}")]
    NotSufficient {
        /// The verification round, starting at 1.
        round: u32,
        /// The expected outcome.
        expected: Outcome,
        /// The observed outcome.
        actual: Outcome,
    },

    /// The dependent test reproduced the expected outcome without any dependencies.
    #[error("round {round}: got {expected} even without any dependencies")]
    NotNecessaryAtAll {
        /// The verification round, starting at 1.
        round: u32,
        /// The expected outcome.
        expected: Outcome,
    },

    /// The dependent test reproduced the expected outcome with a strict subset of its
    /// dependencies.
    #[error(
        "round {round}: got {expected} with only some dependencies: [{}]",
        .subsequence.iter().join(", ")
    )]
    NotMinimal {
        /// The verification round, starting at 1.
        round: u32,
        /// The expected outcome.
        expected: Outcome,
        /// The sub-sequence of dependencies that was sufficient.
        subsequence: Vec<TestName>,
    },

    /// The oracle failed while verifying.
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

impl VerifyError {
    /// Returns true if this error is a failed statistical check rather than an oracle failure.
    ///
    /// Results with failed checks are still persisted, tagged as unverified.
    pub fn is_failed_check(&self) -> bool {
        match self {
            VerifyError::NotSufficient { .. }
            | VerifyError::NotNecessaryAtAll { .. }
            | VerifyError::NotMinimal { .. } => true,
            VerifyError::Oracle(_) => false,
        }
    }
}

/// An error that occurred while reading or writing the result store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResultStoreError {
    /// An error occurred while creating a store directory.
    #[error("error creating store directory `{dir}`")]
    DirCreate {
        /// The directory that could not be created.
        dir: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while acquiring a lock.
    #[error("error acquiring lock on `{path}`")]
    FileLock {
        /// The lock file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while reading a record.
    #[error("error reading record `{path}`")]
    Read {
        /// The record file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A record could not be deserialized.
    #[error("error deserializing record `{path}`")]
    Deserialize {
        /// The record file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A record could not be serialized.
    #[error("error serializing record `{path}`")]
    Serialize {
        /// The record file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// An error occurred while writing a record.
    #[error("error writing record `{path}`")]
    Write {
        /// The record file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A record was written by a newer version of depmin.
    #[error(
        "record `{path}` has format version {file_version}, \
         but this version of depmin only supports up to {max_supported_version}"
    )]
    FormatVersionTooNew {
        /// The record file.
        path: Utf8PathBuf,
        /// The version in the file.
        file_version: u32,
        /// The maximum version supported.
        max_supported_version: u32,
    },

    /// A stored file belongs to a different key than the one it was looked up with.
    #[error("`{path}` is stored for {found}, not {expected}")]
    KeyMismatch {
        /// The stored file.
        path: Utf8PathBuf,
        /// The key that was looked up.
        expected: String,
        /// The key found in the file.
        found: String,
    },
}

/// An error that occurred while reading the depmin config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigReadError {
    /// An error occurred while reading the file.
    #[error("failed to read config file `{file}`")]
    Read {
        /// The config file.
        file: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while deserializing the file as TOML.
    #[error("failed to parse config file `{file}`")]
    Toml {
        /// The config file.
        file: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },

    /// A value in the config was out of range.
    #[error("in config file `{file}`, invalid value for `{key}`: {message}")]
    InvalidValue {
        /// The config file that set the value, or `<default config>`.
        file: Utf8PathBuf,
        /// The key that was invalid.
        key: &'static str,
        /// A description of the problem.
        message: String,
    },
}

/// An error that aborted a minimization session for one dependent test.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The dependency search failed.
    #[error("minimization failed")]
    Minimize(#[from] MinimizeError),

    /// The oracle failed while the result was being verified.
    #[error("oracle failed during verification")]
    VerifyOracle(#[source] OracleError),

    /// The result store could not be read or written.
    #[error("result store error")]
    Store(#[from] ResultStoreError),
}

impl SessionError {
    /// Returns the flakiness report if this session was aborted because of a flaky test.
    pub fn as_flaky(&self) -> Option<&FlakyTestError> {
        match self {
            SessionError::Minimize(error) => error.as_flaky(),
            SessionError::VerifyOracle(_) | SessionError::Store(_) => None,
        }
    }
}
