//! BDD scenarios for attachment coordination.

use rstest_bdd_macros::scenario;

use super::test_helpers::{AttachContext, attach_context};

#[scenario(
    path = "tests/features/attach.feature",
    name = "Attach and detach a volume round trip"
)]
fn scenario_round_trip(attach_context: AttachContext) {
    let _ = attach_context;
}

#[scenario(
    path = "tests/features/attach.feature",
    name = "Surface a backend error state during attach"
)]
fn scenario_error_state(attach_context: AttachContext) {
    let _ = attach_context;
}

#[scenario(
    path = "tests/features/attach.feature",
    name = "Reject a device path lookup on a detached volume"
)]
fn scenario_device_path_detached(attach_context: AttachContext) {
    let _ = attach_context;
}

#[scenario(
    path = "tests/features/attach.feature",
    name = "Surface a rejected attach request without polling"
)]
fn scenario_rejected_attach(attach_context: AttachContext) {
    let _ = attach_context;
}
