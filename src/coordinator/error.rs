//! Error types for the attachment coordinator.

use std::time::Duration;

use thiserror::Error;

use crate::backend::AttachmentState;
use crate::types::{InstanceRef, VolumeRef};

/// Errors raised by [`super::AttachmentCoordinator`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CoordinatorError {
    /// Raised when the backend refuses the initial attach or detach request.
    #[error("backend rejected {action} of volume {volume} on instance {instance}: {message}")]
    BackendRejected {
        /// Request that was refused (`attach` or `detach`).
        action: String,
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
        /// Error message from the backend.
        message: String,
    },
    /// Raised when every status query attempt of one poll cycle fails.
    #[error(
        "backend unavailable while querying volume {volume} on instance {instance} after {attempts} attempts: {message}"
    )]
    BackendUnavailable {
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
        /// Attempts made in the failing cycle.
        attempts: u32,
        /// Error message from the last attempt.
        message: String,
    },
    /// Raised when the backend reports an error state while attaching.
    #[error("volume {volume} entered an error state while attaching to instance {instance}")]
    AttachFailed {
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
    },
    /// Raised when the backend reports an error state while detaching.
    #[error("volume {volume} entered an error state while detaching from instance {instance}")]
    DetachFailed {
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
    },
    /// Raised when the volume is not attached before the deadline.
    #[error("timeout after {waited:?} waiting for volume {volume} to attach to instance {instance}")]
    AttachTimeout {
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
        /// Configured wait bound.
        waited: Duration,
    },
    /// Raised when the volume is not detached before the deadline.
    #[error(
        "timeout after {waited:?} waiting for volume {volume} to detach from instance {instance}"
    )]
    DetachTimeout {
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
        /// Configured wait bound.
        waited: Duration,
    },
    /// Raised when the volume is attached but the backend never reports a
    /// device path.
    #[error("volume {volume} is attached to instance {instance} but has no device path")]
    MissingDevicePath {
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
    },
    /// Raised when a device path is requested for a pair that is not attached.
    #[error("volume {volume} is not attached to instance {instance} (state: {state})")]
    NotAttached {
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
        /// State observed by the query.
        state: AttachmentState,
    },
    /// Raised when an external cancellation signal fires.
    #[error("{action} of volume {volume} on instance {instance} was cancelled")]
    OperationCancelled {
        /// Operation that was interrupted.
        action: String,
        /// Instance identifier.
        instance: InstanceRef,
        /// Volume identifier.
        volume: VolumeRef,
    },
}

impl CoordinatorError {
    /// Returns `true` for [`CoordinatorError::AttachTimeout`] and
    /// [`CoordinatorError::DetachTimeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::AttachTimeout { .. } | Self::DetachTimeout { .. })
    }
}
