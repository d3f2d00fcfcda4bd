// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExecutionOracle, RunOutcomes, TestExecution};
use crate::{errors::OracleError, order::ExecutionOrder, stopwatch::stopwatch};
use camino::Utf8PathBuf;
use depmin_metadata::{OracleRequest, OracleResponse, TestName};
use std::{collections::BTreeSet, thread, time::Duration};
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An oracle that runs tests by invoking an external command.
///
/// For every run, the command is spawned once. It receives an
/// [`OracleRequest`] as JSON on standard input, and must print an
/// [`OracleResponse`] as JSON on standard output and exit with status 0.
///
/// If the command does not exit within the timeout it is killed, and the run fails with
/// [`OracleError::Timeout`].
#[derive(Clone, Debug)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    cwd: Option<Utf8PathBuf>,
}

impl CommandOracle {
    /// Creates a new command oracle.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
            cwd: None,
        }
    }

    /// Creates a command oracle from a command line, where the first element is the program.
    ///
    /// Returns `None` if `command` is empty.
    pub fn from_command_line(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned(), timeout))
    }

    /// Sets the working directory the command runs in.
    pub fn with_cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn parse_response(stdout: &[u8]) -> Result<RunOutcomes, OracleError> {
        let response: OracleResponse = serde_json::from_slice(stdout).map_err(|error| {
            OracleError::execution_with_source("failed to parse oracle response", error)
        })?;

        Ok(response
            .results
            .into_iter()
            .map(|(test, summary)| {
                // Executors that don't measure durations report 0 or omit the field.
                let duration =
                    Duration::try_from_secs_f64(summary.duration_secs).unwrap_or_default();
                (
                    test,
                    TestExecution {
                        outcome: summary.outcome,
                        duration,
                    },
                )
            })
            .collect())
    }
}

impl ExecutionOracle for CommandOracle {
    fn run_order(
        &mut self,
        order: &ExecutionOrder,
        watch: &BTreeSet<TestName>,
    ) -> Result<RunOutcomes, OracleError> {
        let request = OracleRequest {
            order: order.to_vec(),
            watch: watch.iter().cloned().collect(),
        };
        let input = serde_json::to_vec(&request).map_err(|error| {
            OracleError::execution_with_source("failed to serialize oracle request", error)
        })?;

        let mut expression = duct::cmd(self.program.as_str(), &self.args)
            .stdin_bytes(input)
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        if let Some(cwd) = &self.cwd {
            expression = expression.dir(cwd.as_std_path());
        }

        debug!(
            program = %self.program,
            order_len = order.len(),
            "spawning oracle command"
        );
        let stopwatch = stopwatch();
        let handle = expression.start().map_err(|error| {
            OracleError::execution_with_source(
                format!("failed to spawn oracle command `{}`", self.program),
                error,
            )
        })?;

        loop {
            let finished = handle.try_wait().map_err(|error| {
                OracleError::execution_with_source("failed to wait for oracle command", error)
            })?;
            if finished.is_some() {
                break;
            }
            if stopwatch.snapshot().duration >= self.timeout {
                // Errors here aren't important: the run is being abandoned either way.
                _ = handle.kill();
                return Err(OracleError::Timeout {
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }

        let output = handle.into_output().map_err(|error| {
            OracleError::execution_with_source("failed to collect oracle command output", error)
        })?;
        trace!(
            elapsed = ?stopwatch.snapshot().duration,
            status = %output.status,
            "oracle command finished"
        );

        if !output.status.success() {
            let exit_code_str = output
                .status
                .code()
                .map_or(String::new(), |code| format!(" with exit code {code}"));
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::execution(format!(
                "oracle command `{}` failed{exit_code_str}, stderr:\n{stderr}",
                self.program
            )));
        }

        Self::parse_response(&output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use depmin_metadata::Outcome;

    fn sh(script: &str, timeout: Duration) -> CommandOracle {
        CommandOracle::new("sh", ["-c", script], timeout)
    }

    #[test]
    fn parses_response() {
        let mut oracle = sh(
            r#"cat > /dev/null; echo '{"results": {"t": {"outcome": "FAIL", "duration-secs": 0.5}}}'"#,
            Duration::from_secs(30),
        );
        let execution = oracle
            .run_watching(&ExecutionOrder::new(["a", "t"]), &"t".into())
            .expect("oracle run succeeds");
        assert_eq!(
            execution,
            TestExecution {
                outcome: Outcome::Fail,
                duration: Duration::from_millis(500),
            }
        );
    }

    #[test]
    fn receives_request_on_stdin() {
        // PASS only if the expected order arrives on stdin.
        let mut oracle = sh(
            r#"if grep -qF '"order":["a","t"]'; then o=PASS; else o=ERROR; fi
               echo "{\"results\": {\"t\": {\"outcome\": \"$o\"}}}""#,
            Duration::from_secs(30),
        );
        let execution = oracle
            .run_watching(&ExecutionOrder::new(["a", "t"]), &"t".into())
            .expect("oracle run succeeds");
        assert_eq!(execution.outcome, Outcome::Pass);
    }

    #[test]
    fn nonzero_exit_is_execution_error() {
        let mut oracle = sh("cat > /dev/null; echo boom >&2; exit 3", Duration::from_secs(30));
        let error = oracle
            .run_watching(&ExecutionOrder::new(["t"]), &"t".into())
            .expect_err("command fails");
        match error {
            OracleError::Execution { message, .. } => {
                assert!(message.contains("exit code 3"), "message: {message}");
                assert!(message.contains("boom"), "message: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let mut oracle = sh("sleep 10", Duration::from_millis(200));
        let error = oracle
            .run_watching(&ExecutionOrder::new(["t"]), &"t".into())
            .expect_err("command times out");
        assert!(
            matches!(error, OracleError::Timeout { timeout } if timeout == Duration::from_millis(200)),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn empty_command_line() {
        assert!(CommandOracle::from_command_line(&[], Duration::from_secs(1)).is_none());
    }
}
