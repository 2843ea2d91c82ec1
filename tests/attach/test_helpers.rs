//! Shared fixtures for attachment BDD scenarios.

use std::time::Duration;

use cinder_attach::test_support::{RecordingMutator, ScriptedStatusReader, SimulatedCloud};
use cinder_attach::{
    AttachmentCoordinator, CoordinatorError, DevicePath, InstanceRef, PollPolicy, VolumeRef,
};
use rstest::fixture;
use tokio::runtime::Runtime;

#[derive(Clone, Debug)]
pub enum Backend {
    Simulated(SimulatedCloud),
    Scripted {
        mutator: RecordingMutator,
        reader: ScriptedStatusReader,
    },
}

#[derive(Clone, Copy, Debug)]
pub enum Operation {
    Attach,
    Detach,
    DevicePath,
}

#[derive(Clone, Debug)]
pub enum Outcome {
    Path(DevicePath),
    Done,
    Failure(String),
}

#[derive(Clone, Debug)]
pub struct AttachContext {
    pub backend: Backend,
    pub outcome: Option<Outcome>,
}

#[fixture]
pub fn attach_context() -> AttachContext {
    AttachContext {
        backend: Backend::Scripted {
            mutator: RecordingMutator::new(),
            reader: ScriptedStatusReader::new(),
        },
        outcome: None,
    }
}

pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        poll_interval: Duration::from_millis(1),
        wait_timeout: Duration::from_secs(2),
        query_attempts: 2,
        query_retry_delay: Duration::from_millis(1),
    }
}

/// Runs `operation` against the context's backend on a fresh runtime.
pub fn run_operation(
    backend: &Backend,
    operation: Operation,
    instance: &str,
    volume: &str,
) -> Result<Outcome, std::io::Error> {
    let runtime = Runtime::new()?;
    let instance_ref = InstanceRef::new(instance);
    let volume_ref = VolumeRef::new(volume);
    let result = match backend {
        Backend::Simulated(cloud) => {
            let coordinator = AttachmentCoordinator::new(cloud.clone(), cloud.clone(), fast_policy());
            runtime.block_on(execute(&coordinator, operation, &instance_ref, &volume_ref))
        }
        Backend::Scripted { mutator, reader } => {
            let coordinator =
                AttachmentCoordinator::new(mutator.clone(), reader.clone(), fast_policy());
            runtime.block_on(execute(&coordinator, operation, &instance_ref, &volume_ref))
        }
    };
    Ok(result.unwrap_or_else(|err| Outcome::Failure(err.to_string())))
}

async fn execute<M, S>(
    coordinator: &AttachmentCoordinator<M, S>,
    operation: Operation,
    instance: &InstanceRef,
    volume: &VolumeRef,
) -> Result<Outcome, CoordinatorError>
where
    M: cinder_attach::Mutator,
    S: cinder_attach::StatusReader,
{
    match operation {
        Operation::Attach => coordinator.attach(instance, volume).await.map(Outcome::Path),
        Operation::Detach => coordinator.detach(instance, volume).await.map(|()| Outcome::Done),
        Operation::DevicePath => coordinator
            .device_path(instance, volume)
            .await
            .map(Outcome::Path),
    }
}
