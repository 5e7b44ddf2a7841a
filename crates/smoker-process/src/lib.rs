//! Process execution for smoker.
//!
//! This crate runs external package-manager processes on the tokio runtime
//! with output capture, an optional deadline, and a cooperative abort token.
//! An already-cancelled token fails the call before anything is spawned.
//!
//! # Example
//!
//! ```ignore
//! use smoker_process::{run, RunOptions};
//!
//! let result = run("npm", &["--version".into()], &RunOptions::default()).await?;
//! assert!(result.success);
//! ```

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors raised while running a process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` was aborted")]
    Aborted { command: String },
    #[error("`{command}` failed with exit code {exit_code:?}: {stderr}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl ProcessError {
    /// Whether this error came from the abort token.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ProcessError::Aborted { .. })
    }
}

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Rendered command line
    pub command: String,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// Exit code (if available)
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Duration of execution
    pub duration_ms: u64,
    /// Whether the command was killed at its deadline
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandResult {
    /// Check if the command succeeded
    pub fn ok(&self) -> Result<&Self, ProcessError> {
        if self.success {
            Ok(self)
        } else {
            Err(ProcessError::Failed {
                command: self.command.clone(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// Create a result from a process output
    pub fn from_output(command: String, output: &Output, duration: Duration) -> Self {
        Self {
            command,
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: duration.as_millis() as u64,
            timed_out: false,
        }
    }

    fn timed_out(command: String, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            command,
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: format!(
                "command timed out after {}",
                humantime::format_duration(timeout)
            ),
            duration_ms: elapsed.as_millis() as u64,
            timed_out: true,
        }
    }
}

/// How to run a command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Kill the process after this long
    pub timeout: Option<Duration>,
    /// Abort token; cancelling it kills the process
    pub signal: Option<CancellationToken>,
}

impl RunOptions {
    /// Options running in `cwd`.
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Self::default()
        }
    }

    /// Set the abort token.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Set the deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Render a program and its arguments for messages.
pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Run a command and capture its output.
///
/// A non-zero exit is reported through [`CommandResult::success`], not as an
/// error. Errors are reserved for spawn/wait failures and aborts.
pub async fn run(
    program: &str,
    args: &[String],
    opts: &RunOptions,
) -> Result<CommandResult, ProcessError> {
    let command = command_line(program, args);

    if opts.signal.as_ref().is_some_and(|s| s.is_cancelled()) {
        debug!(%command, "abort signal already set, not spawning");
        return Err(ProcessError::Aborted { command });
    }

    let mut cmd = Command::new(which(program).unwrap_or_else(|| PathBuf::from(program)));
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }

    let start = Instant::now();
    debug!(%command, cwd = ?opts.cwd, "spawning");
    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: command.clone(),
        source,
    })?;

    let output = child.wait_with_output();
    tokio::pin!(output);

    let cancelled = async {
        match &opts.signal {
            Some(signal) => signal.cancelled().await,
            None => std::future::pending().await,
        }
    };
    let deadline = async {
        match opts.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    // Dropping `output` drops the child, which kills it.
    tokio::select! {
        res = &mut output => {
            let out = res.map_err(|source| ProcessError::Wait {
                command: command.clone(),
                source,
            })?;
            Ok(CommandResult::from_output(command, &out, start.elapsed()))
        }
        _ = cancelled => {
            debug!(%command, "aborted");
            Err(ProcessError::Aborted { command })
        }
        _ = deadline => {
            let timeout = opts.timeout.unwrap_or_default();
            debug!(%command, timeout = %humantime::format_duration(timeout), "timed out");
            Ok(CommandResult::timed_out(command, timeout, start.elapsed()))
        }
    }
}

/// Check if a command exists in PATH
pub fn command_exists(program: &str) -> bool {
    which(program).is_some()
}

/// Get the full path to a command
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
