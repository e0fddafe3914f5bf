//! Asynchronous execution of host commands for the container driver.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

use crate::error::ProvisionError;

/// Future returned by [`CommandRunner::run`].
pub type CommandFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Converts a non-zero exit into [`CommandError::Failure`].
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failure`] when the command did not succeed.
    pub fn require_success(self, program: &str) -> Result<Self, CommandError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(CommandError::Failure {
            program: program.to_owned(),
            status: self.code,
            status_text: self
                .code
                .map_or_else(|| String::from("unknown"), |code| code.to_string()),
            stderr: self.stderr.trim().to_owned(),
        })
    }
}

/// Errors surfaced while running host commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Failure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

impl From<CommandError> for ProvisionError {
    fn from(value: CommandError) -> Self {
        Self::provider(value.to_string())
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// A non-zero exit is reported through [`CommandOutput::code`], not as an
    /// error.
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> CommandFuture<'a>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> CommandFuture<'a> {
        Box::pin(async move {
            tracing::debug!(program, ?args, "running command");
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| CommandError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
