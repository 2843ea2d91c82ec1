//! Capability traits through which the coordinator reaches a cloud backend.
//!
//! The coordinator never talks to a provider directly. It issues mutations
//! through a [`Mutator`] and observes progress through a [`StatusReader`],
//! so a test double or a different provider can be substituted freely.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::types::{DevicePath, InstanceRef, VolumeRef};

/// Attachment state of one (instance, volume) pair as reported by a backend.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AttachmentState {
    /// The volume is not attached to the instance.
    Detached,
    /// An attach request is in progress.
    Attaching,
    /// The volume is attached to the instance.
    Attached,
    /// A detach request is in progress.
    Detaching,
    /// The backend reports a fault for the volume.
    Error,
    /// A status outside the known vocabulary. Never terminal.
    Unrecognised(String),
}

impl AttachmentState {
    /// Classifies a Cinder-style volume status string.
    ///
    /// Matching ignores case and surrounding whitespace. `in-use` maps to
    /// [`AttachmentState::Attached`] without regard to which instance holds
    /// the volume; callers that know the attachment list refine it.
    #[must_use]
    pub fn classify(status: &str) -> Self {
        let normalised = status.trim().to_ascii_lowercase();
        match normalised.as_str() {
            "available" => Self::Detached,
            "attaching" | "reserved" => Self::Attaching,
            "in-use" => Self::Attached,
            "detaching" => Self::Detaching,
            "error" | "error_attaching" | "error_detaching" => Self::Error,
            _ => Self::Unrecognised(status.trim().to_owned()),
        }
    }

    /// Returns `true` for states that end a polling loop.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Detached | Self::Attached | Self::Error)
    }
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => f.write_str("detached"),
            Self::Attaching => f.write_str("attaching"),
            Self::Attached => f.write_str("attached"),
            Self::Detaching => f.write_str("detaching"),
            Self::Error => f.write_str("error"),
            Self::Unrecognised(raw) => write!(f, "unrecognised ({raw})"),
        }
    }
}

/// Result of a single status query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachmentStatus {
    /// Classified state of the pair.
    pub state: AttachmentState,
    /// Device path, when the backend reports one.
    pub device_path: Option<DevicePath>,
}

impl AttachmentStatus {
    /// Status for a pair that is attached at `device_path`.
    #[must_use]
    pub fn attached(device_path: impl Into<DevicePath>) -> Self {
        Self {
            state: AttachmentState::Attached,
            device_path: Some(device_path.into()),
        }
    }

    /// Status without a device path.
    #[must_use]
    pub const fn in_state(state: AttachmentState) -> Self {
        Self {
            state,
            device_path: None,
        }
    }
}

/// Transient view of one coordinator call. Never persisted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachmentRecord {
    /// Volume being driven.
    pub volume: VolumeRef,
    /// Instance the volume is attached to or detached from.
    pub instance: InstanceRef,
    /// Last device path reported by the backend.
    pub device_path: Option<DevicePath>,
    /// Last state observed, `None` before the first query.
    pub state: Option<AttachmentState>,
}

impl AttachmentRecord {
    /// Starts a record for the pair with nothing observed yet.
    #[must_use]
    pub fn new(instance: &InstanceRef, volume: &VolumeRef) -> Self {
        Self {
            volume: volume.clone(),
            instance: instance.clone(),
            device_path: None,
            state: None,
        }
    }

    /// Folds a query result into the record.
    pub fn observe(&mut self, status: AttachmentStatus) {
        if status.device_path.is_some() {
            self.device_path = status.device_path;
        }
        self.state = Some(status.state);
    }
}

/// Future returned by capability operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Issues attach and detach requests. Both calls return once the backend has
/// accepted the request, not once it has completed.
pub trait Mutator {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Asks the backend to attach `volume` to `instance`.
    fn request_attach<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Asks the backend to detach `volume` from `instance`.
    fn request_detach<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, (), Self::Error>;
}

/// Reads the current attachment state of a pair.
pub trait StatusReader {
    /// Provider specific error type. Every error is treated as transient.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Queries the attachment state of `volume` relative to `instance`.
    fn query_attachment<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, AttachmentStatus, Self::Error>;
}
