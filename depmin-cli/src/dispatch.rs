// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level application and command routing.

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, SummaryStyles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Subcommand};
use depmin_metadata::{DependentTestList, DepminExitCode, MinimizationSummary};
use depmin_runner::{
    config::DepminConfig,
    oracle::CommandOracle,
    session::{BatchMinimizer, BatchOptions, BatchSummary},
    store::ResultStore,
};
use itertools::Itertools;
use owo_colors::OwoColorize;
use std::io::{self, Write};
use tracing::info;

/// Find and verify the minimal test-order dependencies of order-dependent tests.
///
/// depmin re-runs tests through an external command to find, for each dependent test, the smallest
/// list of tests that must run before it to reproduce its order-dependent outcome.
#[derive(Debug, clap::Parser)]
#[command(
    version,
    bin_name = "depmin",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct DepminApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl DepminApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, writing results to stdout.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        self.exec_with(output, &mut writer)
    }

    fn exec_with(self, output: OutputContext, writer: &mut dyn Write) -> Result<i32> {
        match self.command {
            Command::Minimize(opts) => opts.exec(output, writer),
            Command::Show { record } => exec_show(&record, writer),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Minimize the dependencies of every test in a dependent test list.
    ///
    /// Each dependent test is minimized, verified, and written out as a record under the output
    /// directory. Tests with an existing record are skipped unless --force is passed.
    Minimize(MinimizeOpts),

    /// Print a minimization record.
    Show {
        /// Path to the record.
        #[arg(value_name = "RECORD")]
        record: Utf8PathBuf,
    },
}

#[derive(Debug, Args)]
struct MinimizeOpts {
    /// Dependent test list to minimize (JSON)
    #[arg(long, value_name = "PATH")]
    list: Utf8PathBuf,

    /// Config file [default: .config/depmin.toml in the workspace root]
    #[arg(long = "config", value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Workspace root [default: current directory]
    #[arg(long, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    /// Directory to write records to [default: minimizer.output-dir from config]
    #[arg(long, value_name = "DIR")]
    output_dir: Option<Utf8PathBuf>,

    /// Number of verification rounds
    #[arg(long, value_name = "N")]
    rounds: Option<u32>,

    /// Maximum number of sub-sequences checked per verification round
    #[arg(long, value_name = "N")]
    max_subsequence_samples: Option<usize>,

    /// Write search results without verifying them
    #[arg(long)]
    no_verify: bool,

    /// Seed for sub-sequence sampling [default: random]
    #[arg(long, value_name = "SEED", env = "DEPMIN_SEED")]
    seed: Option<u64>,

    /// Recompute records that already exist
    #[arg(long)]
    force: bool,
}

impl MinimizeOpts {
    fn exec(self, output: OutputContext, writer: &mut dyn Write) -> Result<i32> {
        let current_dir = current_dir()?;
        let workspace_root = match &self.workspace_root {
            Some(root) => current_dir.join(root),
            None => current_dir.clone(),
        };

        let mut config = DepminConfig::from_sources(&workspace_root, self.config_file.as_deref())
            .map_err(ExpectedError::config_read)?;
        self.apply_overrides(&mut config, &current_dir);
        config
            .validate(Utf8Path::new("<command line>"))
            .map_err(ExpectedError::config_read)?;

        let list = read_list(&current_dir.join(&self.list))?;

        let mut oracle =
            CommandOracle::from_command_line(&config.oracle.command, config.oracle.timeout)
                .ok_or_else(|| ExpectedError::OracleNotConfigured {
                    config_file: self.config_file.clone(),
                })?
                .with_cwd(&workspace_root);
        let store = ResultStore::new(config.resolve_output_dir(&workspace_root))
            .map_err(ExpectedError::store)?;

        let mut options = BatchOptions::from_config(&config.minimizer);
        options.force = self.force;

        let mut batch = BatchMinimizer::new(&mut oracle, &store, options);
        let summary = batch.run_all(&list);
        info!("wrote records to {} (seed {})", store.dir(), batch.seed());

        write_summary(&summary, &output.stdout_styles(), writer)
            .map_err(ExpectedError::write_output)?;

        if summary.is_success() {
            Ok(DepminExitCode::OK)
        } else {
            Err(ExpectedError::MinimizationIncomplete {
                unverified: summary.unverified.len(),
                flaky: summary.flaky.len(),
                skipped: summary.skipped.len(),
                failed: summary.failed.len(),
            })
        }
    }

    fn apply_overrides(&self, config: &mut DepminConfig, current_dir: &Utf8Path) {
        if let Some(output_dir) = &self.output_dir {
            config.minimizer.output_dir = current_dir.join(output_dir);
        }
        if let Some(rounds) = self.rounds {
            config.minimizer.rounds = rounds;
        }
        if let Some(samples) = self.max_subsequence_samples {
            config.minimizer.max_subsequence_samples = samples;
        }
        if self.no_verify {
            config.minimizer.verify = false;
        }
        if self.seed.is_some() {
            config.minimizer.seed = self.seed;
        }
    }
}

fn exec_show(record: &Utf8Path, writer: &mut dyn Write) -> Result<i32> {
    let summary = ResultStore::load_path(record).map_err(ExpectedError::store)?;
    serde_json::to_writer_pretty(&mut *writer, &summary)
        .map_err(|error| ExpectedError::write_output(error.into()))?;
    writeln!(writer).map_err(ExpectedError::write_output)?;
    Ok(DepminExitCode::OK)
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|error| ExpectedError::CurrentDirFailed { error })?;
    Utf8PathBuf::try_from(dir).map_err(|error| ExpectedError::WorkspaceRootInvalidUtf8 { error })
}

fn read_list(path: &Utf8Path) -> Result<DependentTestList> {
    let contents =
        std::fs::read_to_string(path).map_err(|error| ExpectedError::DependentTestListRead {
            path: path.to_owned(),
            error,
        })?;
    serde_json::from_str(&contents).map_err(|error| ExpectedError::DependentTestListParse {
        path: path.to_owned(),
        error,
    })
}

fn write_summary(
    summary: &BatchSummary,
    styles: &SummaryStyles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    for record in &summary.verified {
        write_record(writer, "verified", styles.verified, record, styles)?;
    }
    for record in &summary.unchecked {
        write_record(writer, "unchecked", styles.unverified, record, styles)?;
    }
    for record in &summary.unverified {
        write_record(writer, "unverified", styles.unverified, record, styles)?;
    }
    for test in &summary.flaky {
        writeln!(
            writer,
            "{:>10} {}",
            "flaky".style(styles.failed),
            test.style(styles.test_name)
        )?;
    }
    for (test, reason) in &summary.skipped {
        writeln!(
            writer,
            "{:>10} {} ({reason})",
            "skipped".style(styles.unverified),
            test.style(styles.test_name)
        )?;
    }
    for (test, _) in &summary.failed {
        writeln!(
            writer,
            "{:>10} {}",
            "failed".style(styles.failed),
            test.style(styles.test_name)
        )?;
    }

    let total = summary.verified.len()
        + summary.unchecked.len()
        + summary.unverified.len()
        + summary.flaky.len()
        + summary.skipped.len()
        + summary.failed.len();
    writeln!(
        writer,
        "{:>10} {} dependent {}: {} verified, {} unchecked, {} unverified, {} flaky, {} skipped, {} failed",
        "Summary".style(styles.count),
        total.style(styles.count),
        if total == 1 { "test" } else { "tests" },
        summary.verified.len().style(styles.verified),
        summary.unchecked.len().style(styles.count),
        summary.unverified.len().style(styles.unverified),
        summary.flaky.len().style(styles.failed),
        summary.skipped.len().style(styles.unverified),
        summary.failed.len().style(styles.failed),
    )
}

fn write_record(
    writer: &mut dyn Write,
    label: &str,
    label_style: owo_colors::Style,
    record: &MinimizationSummary,
    styles: &SummaryStyles,
) -> io::Result<()> {
    let deps = if record.deps.is_empty() {
        "no dependencies".to_owned()
    } else {
        format!("after {}", record.deps.iter().join(", "))
    };
    writeln!(
        writer,
        "{:>10} {} {} {}",
        label.style(label_style),
        record.dependent_test.style(styles.test_name),
        record.expected_outcome,
        deps,
    )
}
