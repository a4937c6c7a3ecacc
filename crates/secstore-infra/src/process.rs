//! External process execution
//!
//! Every OS tool the agent shells out to (mount, iptables, conversion
//! helpers) goes through [`CommandRunner`] so calls are bounded by a timeout
//! and can be replaced in tests.

use async_trait::async_trait;
use secstore_core::constants::GIB;
use secstore_core::AppError;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("{program} exited with status {status:?}: {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { .. } => AppError::Timeout(err.to_string()),
            other => AppError::Process(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion. A non-zero exit is reported through
    /// [`CommandOutput::status`], not as an error.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProcessError>;

    /// Like [`CommandRunner::run`] but a non-zero exit becomes
    /// [`ProcessError::Failed`].
    async fn run_checked(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProcessError> {
        let output = self.run(program, args, timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ProcessError::Failed {
                program: program.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the host with `tokio::process`. The child is killed if
/// the timeout elapses.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProcessError> {
        let start = Instant::now();
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ProcessError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
            Err(_) => {
                tracing::warn!(
                    program = %program,
                    timeout_secs = timeout.as_secs(),
                    "External command timed out"
                );
                return Err(ProcessError::Timeout {
                    program: program.to_string(),
                    secs: timeout.as_secs(),
                });
            }
        };

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::debug!(
            program = %program,
            status = ?result.status,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "External command finished"
        );

        Ok(result)
    }
}

/// Timeout for work whose duration scales with data size: `per_gb_secs` for
/// every started GiB, never less than `floor_secs`.
pub fn size_proportional_timeout(bytes: u64, floor_secs: u64, per_gb_secs: u64) -> Duration {
    let gib = bytes.div_ceil(GIB);
    Duration::from_secs(floor_secs.max(gib.saturating_mul(per_gb_secs)))
}
