//! Attachment coordinator: drives a volume to attached or detached and
//! waits for the backend to agree.
//!
//! Each operation works on exactly one (instance, volume) pair. Calls for
//! different pairs share no mutable state and may run concurrently. Calls for
//! the same pair are not serialised here; callers must not race an attach
//! against a detach of the same pair.

mod error;
mod poll;

use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

use crate::backend::{AttachmentState, Mutator, StatusReader};
use crate::cancel::CancelSignal;
use crate::config::PollPolicy;
use crate::types::{DevicePath, InstanceRef, VolumeRef};

pub use error::CoordinatorError;
use poll::Queried;

/// Direction a poll loop is driving the pair towards.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    Attach,
    Detach,
}

impl Direction {
    const fn action(self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::Detach => "detach",
        }
    }

    fn failed(self, instance: &InstanceRef, volume: &VolumeRef) -> CoordinatorError {
        let (instance, volume) = (instance.clone(), volume.clone());
        match self {
            Self::Attach => CoordinatorError::AttachFailed { instance, volume },
            Self::Detach => CoordinatorError::DetachFailed { instance, volume },
        }
    }

    fn timeout(
        self,
        instance: &InstanceRef,
        volume: &VolumeRef,
        policy: &PollPolicy,
    ) -> CoordinatorError {
        let (instance, volume, waited) = (instance.clone(), volume.clone(), policy.wait_timeout);
        match self {
            Self::Attach => CoordinatorError::AttachTimeout {
                instance,
                volume,
                waited,
            },
            Self::Detach => CoordinatorError::DetachTimeout {
                instance,
                volume,
                waited,
            },
        }
    }
}

/// Coordinates attach and detach requests with status polling.
///
/// Constructed once with its collaborators and shared by reference.
#[derive(Clone, Debug)]
pub struct AttachmentCoordinator<M, S> {
    mutator: M,
    reader: S,
    policy: PollPolicy,
    cancel: CancelSignal,
}

impl<M, S> AttachmentCoordinator<M, S>
where
    M: Mutator,
    S: StatusReader,
{
    /// Creates a coordinator that never observes external cancellation.
    #[must_use]
    pub const fn new(mutator: M, reader: S, policy: PollPolicy) -> Self {
        Self {
            mutator,
            reader,
            policy,
            cancel: CancelSignal::never(),
        }
    }

    /// Aborts poll loops with [`CoordinatorError::OperationCancelled`] once
    /// `signal` fires.
    #[must_use]
    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// Returns the poll policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Requests attachment and waits until the backend reports the volume
    /// attached with a device path. The deadline covers the request as well
    /// as the wait.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::BackendRejected`] when the request is
    /// refused, [`CoordinatorError::AttachFailed`] when the backend reports an
    /// error state, [`CoordinatorError::AttachTimeout`] or
    /// [`CoordinatorError::MissingDevicePath`] when the deadline passes, and
    /// [`CoordinatorError::BackendUnavailable`] when status queries keep
    /// failing.
    pub async fn attach(
        &self,
        instance: &InstanceRef,
        volume: &VolumeRef,
    ) -> Result<DevicePath, CoordinatorError> {
        let deadline = self.deadline();
        info!(%instance, %volume, "requesting volume attach");
        self.request(Direction::Attach, instance, volume, deadline)
            .await?;
        self.settle_attached(instance, volume, deadline).await
    }

    /// Waits for an attachment requested elsewhere to complete.
    ///
    /// # Errors
    ///
    /// As [`Self::attach`], without [`CoordinatorError::BackendRejected`].
    pub async fn wait_attached(
        &self,
        instance: &InstanceRef,
        volume: &VolumeRef,
    ) -> Result<DevicePath, CoordinatorError> {
        self.settle_attached(instance, volume, self.deadline()).await
    }

    /// Requests detachment and waits until the backend reports the volume
    /// detached. The deadline covers the request as well as the wait.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::BackendRejected`] when the request is
    /// refused, [`CoordinatorError::DetachFailed`] when the backend reports an
    /// error state, [`CoordinatorError::DetachTimeout`] when the deadline
    /// passes, and [`CoordinatorError::BackendUnavailable`] when status
    /// queries keep failing.
    pub async fn detach(
        &self,
        instance: &InstanceRef,
        volume: &VolumeRef,
    ) -> Result<(), CoordinatorError> {
        let deadline = self.deadline();
        info!(%instance, %volume, "requesting volume detach");
        self.request(Direction::Detach, instance, volume, deadline)
            .await?;
        self.poll_until(Direction::Detach, instance, volume, deadline)
            .await
            .map(|_| ())
    }

    /// Waits for a detachment requested elsewhere to complete.
    ///
    /// # Errors
    ///
    /// As [`Self::detach`], without [`CoordinatorError::BackendRejected`].
    pub async fn wait_detached(
        &self,
        instance: &InstanceRef,
        volume: &VolumeRef,
    ) -> Result<(), CoordinatorError> {
        self.poll_until(Direction::Detach, instance, volume, self.deadline())
            .await
            .map(|_| ())
    }

    /// Looks up the device path of an attached volume with a single query.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotAttached`] when the pair is in any state
    /// other than attached, [`CoordinatorError::MissingDevicePath`] when it is
    /// attached without a reported path, and
    /// [`CoordinatorError::BackendUnavailable`] when the query keeps failing
    /// or gets no answer within the wait timeout.
    pub async fn device_path(
        &self,
        instance: &InstanceRef,
        volume: &VolumeRef,
    ) -> Result<DevicePath, CoordinatorError> {
        let queried = self
            .query_with_retry("device_path", instance, volume, self.deadline())
            .await?;
        let status = match queried {
            Queried::Status(status) => status,
            Queried::DeadlinePassed { attempts } => {
                return Err(CoordinatorError::BackendUnavailable {
                    instance: instance.clone(),
                    volume: volume.clone(),
                    attempts,
                    message: format!("no status within {:?}", self.policy.wait_timeout),
                });
            }
        };
        match (status.state, status.device_path) {
            (AttachmentState::Attached, Some(path)) => Ok(path),
            (AttachmentState::Attached, None) => Err(CoordinatorError::MissingDevicePath {
                instance: instance.clone(),
                volume: volume.clone(),
            }),
            (state, _) => Err(CoordinatorError::NotAttached {
                instance: instance.clone(),
                volume: volume.clone(),
                state,
            }),
        }
    }

    async fn settle_attached(
        &self,
        instance: &InstanceRef,
        volume: &VolumeRef,
        deadline: Instant,
    ) -> Result<DevicePath, CoordinatorError> {
        let record = self
            .poll_until(Direction::Attach, instance, volume, deadline)
            .await?;
        record
            .device_path
            .ok_or_else(|| CoordinatorError::MissingDevicePath {
                instance: instance.clone(),
                volume: volume.clone(),
            })
    }

    /// Sends the mutating request for `direction`, bounded by `deadline`
    /// and the cancel signal.
    async fn request(
        &self,
        direction: Direction,
        instance: &InstanceRef,
        volume: &VolumeRef,
        deadline: Instant,
    ) -> Result<(), CoordinatorError> {
        let action = direction.action();
        if self.cancel.is_cancelled() {
            return Err(poll::cancelled(action, instance, volume));
        }
        let request = match direction {
            Direction::Attach => self.mutator.request_attach(instance, volume),
            Direction::Detach => self.mutator.request_detach(instance, volume),
        };
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                return Err(poll::cancelled(action, instance, volume));
            }
            result = request => result,
            () = sleep_until(deadline) => {
                warn!(%instance, %volume, "{action} request still pending at deadline");
                return Err(direction.timeout(instance, volume, &self.policy));
            }
        };
        result.map_err(|err| {
            warn!(%instance, %volume, error = %err, "{action} request rejected");
            CoordinatorError::BackendRejected {
                action: action.to_owned(),
                instance: instance.clone(),
                volume: volume.clone(),
                message: err.to_string(),
            }
        })
    }
}
