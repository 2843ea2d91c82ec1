//! BDD step definitions for attachment coordination.

use cinder_attach::test_support::{RecordingMutator, ScriptedStatusReader, SimulatedCloud};
use cinder_attach::{AttachmentState, InstanceRef, VolumeRef};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{AttachContext, Backend, Operation, Outcome, run_operation};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("runtime setup failed: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a simulated cloud that settles after {polls:u32} polls")]
fn simulated_cloud(mut attach_context: AttachContext, polls: u32) -> AttachContext {
    let settle = usize::try_from(polls).unwrap_or_else(|err| panic!("poll count: {err}"));
    attach_context.backend = Backend::Simulated(SimulatedCloud::new(settle));
    attach_context
}

#[given("a status reader that reports an error state")]
fn reader_reports_error(mut attach_context: AttachContext) -> AttachContext {
    let reader = ScriptedStatusReader::new();
    reader.push_state(AttachmentState::Attaching);
    reader.push_state(AttachmentState::Error);
    attach_context.backend = Backend::Scripted {
        mutator: RecordingMutator::new(),
        reader,
    };
    attach_context
}

#[given("a status reader that reports the volume detached")]
fn reader_reports_detached(mut attach_context: AttachContext) -> AttachContext {
    let reader = ScriptedStatusReader::new();
    reader.push_state(AttachmentState::Detached);
    attach_context.backend = Backend::Scripted {
        mutator: RecordingMutator::new(),
        reader,
    };
    attach_context
}

#[given("a mutator that rejects requests with \"{message}\"")]
fn mutator_rejects(mut attach_context: AttachContext, message: String) -> AttachContext {
    let mutator = RecordingMutator::new();
    mutator.reject_with(message.trim());
    attach_context.backend = Backend::Scripted {
        mutator,
        reader: ScriptedStatusReader::new(),
    };
    attach_context
}

fn perform(
    attach_context: AttachContext,
    operation: Operation,
    instance: &str,
    volume: &str,
) -> Result<AttachContext, StepError> {
    let outcome = run_operation(&attach_context.backend, operation, instance, volume)?;
    Ok(AttachContext {
        outcome: Some(outcome),
        ..attach_context
    })
}

#[when("I attach volume \"{volume}\" to instance \"{instance}\"")]
fn attach_volume(
    attach_context: AttachContext,
    volume: String,
    instance: String,
) -> Result<AttachContext, StepError> {
    perform(attach_context, Operation::Attach, &instance, &volume)
}

#[when("I detach volume \"{volume}\" from instance \"{instance}\"")]
fn detach_volume(
    attach_context: AttachContext,
    volume: String,
    instance: String,
) -> Result<AttachContext, StepError> {
    perform(attach_context, Operation::Detach, &instance, &volume)
}

#[when("I look up the device path of volume \"{volume}\" on instance \"{instance}\"")]
fn look_up_device_path(
    attach_context: AttachContext,
    volume: String,
    instance: String,
) -> Result<AttachContext, StepError> {
    perform(attach_context, Operation::DevicePath, &instance, &volume)
}

#[then("the attach result is device path \"{path}\"")]
fn attach_result_is_path(attach_context: &AttachContext, path: String) -> Result<(), StepError> {
    match attach_context.outcome.as_ref() {
        Some(Outcome::Path(actual)) if actual.as_str() == path.trim() => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected device path {path}, got {other:?}"
        ))),
    }
}

#[then("volume \"{volume}\" is detached from instance \"{instance}\"")]
fn pair_is_detached(
    attach_context: &AttachContext,
    volume: String,
    instance: String,
) -> Result<(), StepError> {
    if !matches!(attach_context.outcome, Some(Outcome::Done)) {
        return Err(StepError::Assertion(format!(
            "expected detach to succeed, got {:?}",
            attach_context.outcome
        )));
    }
    let Backend::Simulated(cloud) = &attach_context.backend else {
        return Err(StepError::Assertion(String::from(
            "scenario requires a simulated cloud",
        )));
    };
    let state = cloud.state_of(&InstanceRef::new(instance), &VolumeRef::new(volume));
    if state == AttachmentState::Detached {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected detached, got {state}")))
    }
}

#[then("the operation fails with \"{fragment}\"")]
fn operation_fails_with(attach_context: &AttachContext, fragment: String) -> Result<(), StepError> {
    match attach_context.outcome.as_ref() {
        Some(Outcome::Failure(message)) if message.contains(fragment.trim()) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure containing {fragment:?}, got {other:?}"
        ))),
    }
}

#[then("no status query was issued")]
fn no_status_query(attach_context: &AttachContext) -> Result<(), StepError> {
    match &attach_context.backend {
        Backend::Scripted { reader, .. } if reader.queries() == 0 => Ok(()),
        Backend::Scripted { reader, .. } => Err(StepError::Assertion(format!(
            "expected no queries, got {}",
            reader.queries()
        ))),
        Backend::Simulated(_) => Err(StepError::Assertion(String::from(
            "scenario requires a scripted reader",
        ))),
    }
}
