//! Volume attachment lifecycle coordinator for OpenStack-style block storage.
//!
//! The crate drives a volume from detached to attached with a known device
//! path (or back again) against a backend that reports progress
//! asynchronously. The backend is reached only through the [`Mutator`] and
//! [`StatusReader`] capabilities; [`OpenStackCli`] implements both by
//! shelling out to the `openstack` client.

pub mod backend;
pub mod cancel;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod openstack;
pub mod test_support;
pub mod types;

pub use backend::{
    AttachmentRecord, AttachmentState, AttachmentStatus, BackendFuture, Mutator, StatusReader,
};
pub use cancel::{CancelHandle, CancelSignal};
pub use command::{
    CommandError, CommandFuture, CommandOutput, CommandRunner, ProcessCommandRunner,
};
pub use config::{ConfigError, CoordinatorConfig, PollPolicy};
pub use coordinator::{AttachmentCoordinator, CoordinatorError};
pub use openstack::{OpenStackCli, OpenStackError};
pub use types::{DevicePath, InstanceRef, VolumeRef};
