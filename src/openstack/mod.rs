//! Backend capabilities implemented by shelling out to the `openstack` CLI.
//!
//! The client handles authentication, endpoint discovery and transport, so
//! this adapter only builds argument lists and interprets JSON output.

mod types;

use std::ffi::OsString;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{AttachmentStatus, BackendFuture, Mutator, StatusReader};
use crate::command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
use crate::config::{CoordinatorConfig, DEFAULT_COMMAND_TIMEOUT};
use crate::types::{InstanceRef, VolumeRef};
use types::VolumeShow;

/// Errors raised by the OpenStack CLI adapter.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpenStackError {
    /// Raised when the client cannot be started.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when the client exits with a non-zero status.
    #[error("{program} {operation} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Operation being performed (for example `server add volume`).
        operation: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the client.
        stderr: String,
    },
    /// Raised when JSON output cannot be parsed.
    #[error("failed to parse volume {volume} output: {message}")]
    Parse {
        /// Volume being queried.
        volume: VolumeRef,
        /// Parser error message.
        message: String,
    },
    /// Raised when the client does not finish within the command timeout.
    /// The child process is killed.
    #[error("{program} {operation} did not finish within {timeout:?}")]
    Timeout {
        /// Program that was stopped.
        program: String,
        /// Operation being performed.
        operation: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
}

/// Mutator and status reader backed by the `openstack` command-line client.
#[derive(Clone, Debug)]
pub struct OpenStackCli<R> {
    runner: R,
    program: String,
    os_cloud: Option<String>,
    command_timeout: Duration,
}

impl OpenStackCli<ProcessCommandRunner> {
    /// Creates an adapter wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(config: &CoordinatorConfig) -> Self {
        Self::from_config(config, ProcessCommandRunner)
    }
}

impl<R> OpenStackCli<R>
where
    R: CommandRunner,
{
    /// Creates an adapter invoking `program` through `runner`.
    #[must_use]
    pub fn new(runner: R, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into().trim().to_owned(),
            os_cloud: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Creates an adapter from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &CoordinatorConfig, runner: R) -> Self {
        Self::new(runner, config.openstack_bin.as_str())
            .os_cloud(config.os_cloud.clone())
            .command_timeout(config.command_timeout())
    }

    /// Bounds each client invocation; a command still running after
    /// `timeout` is abandoned and killed.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Selects a named cloud from `clouds.yaml`.
    #[must_use]
    pub fn os_cloud(mut self, value: Option<String>) -> Self {
        self.os_cloud = value.map(|cloud| cloud.trim().to_owned());
        self
    }

    fn base_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(cloud) = &self.os_cloud {
            args.push(OsString::from("--os-cloud"));
            args.push(OsString::from(cloud));
        }
        args
    }

    pub(crate) fn attach_args(&self, instance: &InstanceRef, volume: &VolumeRef) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(["server", "add", "volume"].map(OsString::from));
        args.push(OsString::from(instance.as_str()));
        args.push(OsString::from(volume.as_str()));
        args
    }

    pub(crate) fn detach_args(&self, instance: &InstanceRef, volume: &VolumeRef) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(["server", "remove", "volume"].map(OsString::from));
        args.push(OsString::from(instance.as_str()));
        args.push(OsString::from(volume.as_str()));
        args
    }

    pub(crate) fn show_args(&self, volume: &VolumeRef) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(["volume", "show"].map(OsString::from));
        args.push(OsString::from(volume.as_str()));
        args.extend(["-f", "json"].map(OsString::from));
        args
    }

    /// Runs the client under the command timeout and checks its exit
    /// status.
    async fn run_checked(
        &self,
        operation: &str,
        args: Vec<OsString>,
    ) -> Result<CommandOutput, OpenStackError> {
        debug!(program = %self.program, operation, "invoking openstack client");
        let output = tokio::time::timeout(
            self.command_timeout,
            self.runner.run(&self.program, &args),
        )
        .await
        .map_err(|_| {
            warn!(program = %self.program, operation, "openstack client timed out");
            OpenStackError::Timeout {
                program: self.program.clone(),
                operation: operation.to_owned(),
                timeout: self.command_timeout,
            }
        })??;

        if output.is_success() {
            return Ok(output);
        }

        Err(OpenStackError::CommandFailure {
            program: self.program.clone(),
            operation: operation.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

impl<R> Mutator for OpenStackCli<R>
where
    R: CommandRunner,
{
    type Error = OpenStackError;

    fn request_attach<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.run_checked("server add volume", self.attach_args(instance, volume))
                .await
                .map(|_| ())
        })
    }

    fn request_detach<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.run_checked("server remove volume", self.detach_args(instance, volume))
                .await
                .map(|_| ())
        })
    }
}

impl<R> StatusReader for OpenStackCli<R>
where
    R: CommandRunner,
{
    type Error = OpenStackError;

    fn query_attachment<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, AttachmentStatus, Self::Error> {
        Box::pin(async move {
            let output = self.run_checked("volume show", self.show_args(volume)).await?;
            let show = serde_json::from_str::<VolumeShow>(&output.stdout).map_err(|err| {
                OpenStackError::Parse {
                    volume: volume.clone(),
                    message: err.to_string(),
                }
            })?;
            Ok(show.status_for(instance))
        })
    }
}
