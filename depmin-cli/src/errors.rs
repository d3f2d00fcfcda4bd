// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use depmin_metadata::DepminExitCode;
use depmin_runner::errors::{ConfigReadError, ResultStoreError};
use owo_colors::OwoColorize;
use std::error::Error;
use swrite::{SWrite, swrite};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders. Errors are meant to be printed with display_to_stderr,
// which colorizes them and prints their causes.

/// An error that depmin expects and reports with a dedicated exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed { error: std::io::Error },
    #[error("workspace root is not valid UTF-8")]
    WorkspaceRootInvalidUtf8 { error: camino::FromPathBufError },
    #[error("config read error")]
    ConfigRead { error: ConfigReadError },
    #[error("no oracle command configured")]
    OracleNotConfigured { config_file: Option<Utf8PathBuf> },
    #[error("dependent test list read error")]
    DependentTestListRead {
        path: Utf8PathBuf,
        error: std::io::Error,
    },
    #[error("dependent test list parse error")]
    DependentTestListParse {
        path: Utf8PathBuf,
        error: serde_json::Error,
    },
    #[error("result store error")]
    Store { error: ResultStoreError },
    #[error("error writing output")]
    WriteOutput { error: std::io::Error },
    #[error("minimization incomplete")]
    MinimizationIncomplete {
        unverified: usize,
        flaky: usize,
        skipped: usize,
        failed: usize,
    },
}

impl ExpectedError {
    pub(crate) fn config_read(error: ConfigReadError) -> Self {
        Self::ConfigRead { error }
    }

    pub(crate) fn store(error: ResultStoreError) -> Self {
        Self::Store { error }
    }

    pub(crate) fn write_output(error: std::io::Error) -> Self {
        Self::WriteOutput { error }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::WorkspaceRootInvalidUtf8 { .. }
            | Self::ConfigRead { .. }
            | Self::OracleNotConfigured { .. } => DepminExitCode::SETUP_ERROR,
            Self::DependentTestListRead { .. } | Self::DependentTestListParse { .. } => {
                DepminExitCode::DEPENDENT_TEST_LIST_ERROR
            }
            Self::Store { .. } => DepminExitCode::STORE_ERROR,
            Self::WriteOutput { .. } => DepminExitCode::WRITE_OUTPUT_ERROR,
            Self::MinimizationIncomplete { .. } => DepminExitCode::MINIMIZATION_INCOMPLETE,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { error } => {
                error!("could not determine the current directory");
                Some(error as &dyn Error)
            }
            Self::WorkspaceRootInvalidUtf8 { error } => {
                error!("workspace root is not valid UTF-8");
                Some(error as &dyn Error)
            }
            Self::ConfigRead { error } => {
                error!("{}", error);
                error.source()
            }
            Self::OracleNotConfigured { config_file } => {
                let source = match config_file {
                    Some(file) => format!("config file `{}`", file.style(styles.bold)),
                    None => "config".to_owned(),
                };
                error!(
                    "no oracle command configured: set `{}` in {source}",
                    "oracle.command".style(styles.bold),
                );
                None
            }
            Self::DependentTestListRead { path, error } => {
                error!(
                    "failed to read dependent test list `{}`",
                    path.style(styles.bold)
                );
                Some(error as &dyn Error)
            }
            Self::DependentTestListParse { path, error } => {
                error!(
                    "failed to parse dependent test list `{}`",
                    path.style(styles.bold)
                );
                Some(error as &dyn Error)
            }
            Self::Store { error } => {
                error!("{}", error);
                error.source()
            }
            Self::WriteOutput { error } => {
                error!("failed to write output");
                Some(error as &dyn Error)
            }
            Self::MinimizationIncomplete {
                unverified,
                flaky,
                skipped,
                failed,
            } => {
                let parts = [
                    (*unverified, "unverified"),
                    (*flaky, "flaky"),
                    (*skipped, "skipped"),
                    (*failed, "failed"),
                ];
                let mut description = String::new();
                for (count, label) in parts.into_iter().filter(|(count, _)| *count > 0) {
                    if !description.is_empty() {
                        description.push_str(", ");
                    }
                    swrite!(description, "{} {label}", count.style(styles.warning_text));
                }
                error!("minimization incomplete: {description}");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
