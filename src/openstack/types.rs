//! JSON shapes emitted by `openstack volume show -f json`.

use serde::Deserialize;

use crate::backend::{AttachmentState, AttachmentStatus};
use crate::types::{DevicePath, InstanceRef};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct VolumeShow {
    pub(super) status: String,
    #[serde(default)]
    pub(super) attachments: Vec<VolumeAttachment>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct VolumeAttachment {
    pub(super) server_id: String,
    #[serde(default)]
    pub(super) device: Option<String>,
}

impl VolumeShow {
    /// Interprets the volume status relative to `instance`. A volume that is
    /// in use by some other server counts as detached from this one.
    pub(super) fn status_for(&self, instance: &InstanceRef) -> AttachmentStatus {
        let state = AttachmentState::classify(&self.status);
        if state != AttachmentState::Attached {
            return AttachmentStatus::in_state(state);
        }

        let Some(attachment) = self
            .attachments
            .iter()
            .find(|attachment| attachment.server_id.trim() == instance.as_str())
        else {
            return AttachmentStatus::in_state(AttachmentState::Detached);
        };

        AttachmentStatus {
            state,
            device_path: attachment
                .device
                .as_deref()
                .map(str::trim)
                .filter(|device| !device.is_empty())
                .map(DevicePath::from),
        }
    }
}
