// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for depmin.
//!
//! Configuration is read from an embedded default config, with the repository's
//! `.config/depmin.toml` (or an explicitly specified file) layered on top.

use crate::{
    errors::ConfigReadError,
    verify::{DEFAULT_MAX_SUBSEQUENCE_SAMPLES, DEFAULT_ROUNDS},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{collections::BTreeSet, io, time::Duration};
use tracing::{debug, warn};

/// Overall configuration for depmin.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DepminConfig {
    /// Settings for the search and verification.
    pub minimizer: MinimizerConfig,

    /// Settings for the command oracle.
    pub oracle: OracleConfig,
}

/// Settings for the search and verification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MinimizerConfig {
    /// The number of verification rounds.
    pub rounds: u32,

    /// The maximum number of sub-sequences checked per verification round.
    pub max_subsequence_samples: usize,

    /// The directory records are written to. Relative paths are relative to the workspace root.
    pub output_dir: Utf8PathBuf,

    /// Whether search results are verified before being written out.
    pub verify: bool,

    /// The seed for sub-sequence sampling. If `None`, a random seed is used.
    pub seed: Option<u64>,
}

/// Settings for the command oracle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OracleConfig {
    /// The command line, starting with the program. May be empty if no oracle is configured.
    pub command: Vec<String>,

    /// How long one run of the command may take.
    pub timeout: Duration,
}

impl DepminConfig {
    /// The default location of the config within a repository.
    pub const CONFIG_PATH: &'static str = ".config/depmin.toml";

    /// The contents of the default config.
    ///
    /// This config is always layered underneath the repository config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    const DEFAULT_CONFIG_NAME: &'static str = "<default config>";

    /// Reads the config, layering `config_file` (or `.config/depmin.toml` under `workspace_root`
    /// if it exists) over the default config.
    ///
    /// Unknown keys are logged as warnings.
    pub fn from_sources(
        workspace_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigReadError> {
        Self::from_sources_impl(workspace_root, config_file, |config_file, unknown| {
            let mut unknown_str = String::new();
            if unknown.len() == 1 {
                // Print this on the same line.
                unknown_str.push(' ');
                unknown_str.extend(unknown.iter().map(String::as_str));
            } else {
                for ignored_key in unknown {
                    unknown_str.push_str("\n  - ");
                    unknown_str.push_str(ignored_key);
                }
            }

            warn!("ignoring unknown configuration keys in config file {config_file}:{unknown_str}");
        })
    }

    /// Returns the default config.
    pub fn default_config() -> Result<Self, ConfigReadError> {
        let default_file = Utf8Path::new(Self::DEFAULT_CONFIG_NAME);
        let (default, _) = parse(default_file, Self::DEFAULT_CONFIG)?;
        Self::resolve(DeserializedConfig::default(), default, default_file)
    }

    // A custom unknown_callback can be passed in while testing.
    fn from_sources_impl(
        workspace_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigReadError> {
        let default_file = Utf8Path::new(Self::DEFAULT_CONFIG_NAME);
        let (default, _) = parse(default_file, Self::DEFAULT_CONFIG)?;

        let (path, contents) = match config_file {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|error| ConfigReadError::Read {
                        file: path.to_owned(),
                        error,
                    })?;
                (path.to_owned(), Some(contents))
            }
            None => {
                let path = workspace_root.join(Self::CONFIG_PATH);
                match std::fs::read_to_string(&path) {
                    Ok(contents) => (path, Some(contents)),
                    Err(error) if error.kind() == io::ErrorKind::NotFound => {
                        debug!("config: no config file at {path}, using defaults");
                        (path, None)
                    }
                    Err(error) => return Err(ConfigReadError::Read { file: path, error }),
                }
            }
        };

        let Some(contents) = contents else {
            return Self::resolve(DeserializedConfig::default(), default, default_file);
        };

        debug!("config: loading from {path}");
        let (user, unknown) = parse(&path, &contents)?;
        if !unknown.is_empty() {
            unknown_callback(&path, &unknown);
        }
        Self::resolve(user, default, &path)
    }

    fn resolve(
        user: DeserializedConfig,
        default: DeserializedConfig,
        file: &Utf8Path,
    ) -> Result<Self, ConfigReadError> {
        let minimizer = MinimizerConfig {
            rounds: user
                .minimizer
                .rounds
                .or(default.minimizer.rounds)
                .unwrap_or(DEFAULT_ROUNDS),
            max_subsequence_samples: user
                .minimizer
                .max_subsequence_samples
                .or(default.minimizer.max_subsequence_samples)
                .unwrap_or(DEFAULT_MAX_SUBSEQUENCE_SAMPLES),
            output_dir: user
                .minimizer
                .output_dir
                .or(default.minimizer.output_dir)
                .unwrap_or_else(|| Utf8PathBuf::from("depmin-out")),
            verify: user
                .minimizer
                .verify
                .or(default.minimizer.verify)
                .unwrap_or(true),
            seed: user.minimizer.seed.or(default.minimizer.seed),
        };
        let oracle = OracleConfig {
            command: user
                .oracle
                .command
                .or(default.oracle.command)
                .unwrap_or_default(),
            timeout: user
                .oracle
                .timeout
                .or(default.oracle.timeout)
                .unwrap_or(Duration::from_secs(600)),
        };

        let config = Self { minimizer, oracle };
        config.validate(file)?;
        Ok(config)
    }

    /// Checks that values are in range. `file` is used for error reporting.
    pub fn validate(&self, file: &Utf8Path) -> Result<(), ConfigReadError> {
        let invalid = |key: &'static str, message: &str| ConfigReadError::InvalidValue {
            file: file.to_owned(),
            key,
            message: message.to_owned(),
        };

        if self.minimizer.rounds == 0 {
            return Err(invalid("minimizer.rounds", "must be at least 1"));
        }
        if self.minimizer.max_subsequence_samples == 0 {
            return Err(invalid(
                "minimizer.max-subsequence-samples",
                "must be at least 1",
            ));
        }
        if self.oracle.timeout.is_zero() {
            return Err(invalid("oracle.timeout", "must be greater than zero"));
        }
        if self.oracle.command.first().is_some_and(|program| program.is_empty()) {
            return Err(invalid("oracle.command", "program must not be empty"));
        }
        Ok(())
    }

    /// Returns the output directory, resolved against `workspace_root` if relative.
    pub fn resolve_output_dir(&self, workspace_root: &Utf8Path) -> Utf8PathBuf {
        workspace_root.join(&self.minimizer.output_dir)
    }
}

fn parse(
    file: &Utf8Path,
    contents: &str,
) -> Result<(DeserializedConfig, BTreeSet<String>), ConfigReadError> {
    let to_error = |error| ConfigReadError::Toml {
        file: file.to_owned(),
        error,
    };

    let deserializer = toml::Deserializer::parse(contents).map_err(to_error)?;
    let mut unknown = BTreeSet::new();
    let config: DeserializedConfig = serde_ignored::deserialize(deserializer, |path| {
        unknown.insert(path.to_string());
    })
    .map_err(to_error)?;
    Ok((config, unknown))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedConfig {
    #[serde(default)]
    minimizer: DeserializedMinimizerConfig,
    #[serde(default)]
    oracle: DeserializedOracleConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedMinimizerConfig {
    #[serde(default)]
    rounds: Option<u32>,
    #[serde(default)]
    max_subsequence_samples: Option<usize>,
    #[serde(default)]
    output_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    verify: Option<bool>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedOracleConfig {
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}
