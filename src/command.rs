//! Command runner abstraction used by the OpenStack CLI adapter.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

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

    /// Human readable representation of the exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while starting a command.
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
}

/// Future returned by [`CommandRunner::run`].
pub type CommandFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// Dropping the returned future before it completes must stop the
    /// command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a>;
}

/// Real command runner that shells out to the host operating system.
///
/// The child is killed when the future is dropped, so a caller that gives
/// up on a command does not leave it running.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a> {
        Box::pin(async move {
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
