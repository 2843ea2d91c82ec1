//! Test doubles shared across unit and integration tests.
//!
//! Every double is cheap to clone and clones share state, so a test can keep
//! one copy for assertions while the coordinator owns another.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::backend::{AttachmentState, AttachmentStatus, BackendFuture, Mutator, StatusReader};
use crate::command::{CommandError, CommandFuture, CommandOutput, CommandRunner};
use crate::types::{DevicePath, InstanceRef, VolumeRef};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Error produced by scripted doubles.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{0}")]
pub struct ScriptedError(pub String);

/// A queued reply: a result, or a future that never resolves.
#[derive(Clone, Debug)]
enum Reply<T> {
    Ready(T),
    Hang,
}

/// Status reader that replays queued responses in FIFO order.
///
/// Once the queue is drained the last successful status is repeated. A
/// reader with nothing queued and nothing seen reports `Detached`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedStatusReader {
    responses: Arc<Mutex<VecDeque<Reply<Result<AttachmentStatus, ScriptedError>>>>>,
    last: Arc<Mutex<Option<AttachmentStatus>>>,
    queries: Arc<Mutex<usize>>,
}

impl ScriptedStatusReader {
    /// Creates a reader with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful status.
    pub fn push_status(&self, status: AttachmentStatus) {
        lock(&self.responses).push_back(Reply::Ready(Ok(status)));
    }

    /// Queues a bare state without a device path.
    pub fn push_state(&self, state: AttachmentState) {
        self.push_status(AttachmentStatus::in_state(state));
    }

    /// Queues `count` copies of `state`.
    pub fn push_states(&self, state: &AttachmentState, count: usize) {
        for _ in 0..count {
            self.push_state(state.clone());
        }
    }

    /// Queues an attached status with a device path.
    pub fn push_attached(&self, device_path: &str) {
        self.push_status(AttachmentStatus::attached(device_path));
    }

    /// Queues a transient query failure.
    pub fn push_failure(&self, message: &str) {
        lock(&self.responses).push_back(Reply::Ready(Err(ScriptedError(message.to_owned()))));
    }

    /// Queues a query that never answers.
    pub fn push_hang(&self) {
        lock(&self.responses).push_back(Reply::Hang);
    }

    /// Number of queries issued so far.
    #[must_use]
    pub fn queries(&self) -> usize {
        *lock(&self.queries)
    }

    fn next(&self) -> Reply<Result<AttachmentStatus, ScriptedError>> {
        *lock(&self.queries) += 1;
        let queued = lock(&self.responses).pop_front();
        match queued {
            Some(Reply::Ready(Ok(status))) => {
                *lock(&self.last) = Some(status.clone());
                Reply::Ready(Ok(status))
            }
            Some(reply) => reply,
            None => Reply::Ready(Ok(lock(&self.last)
                .clone()
                .unwrap_or_else(|| AttachmentStatus::in_state(AttachmentState::Detached)))),
        }
    }
}

impl StatusReader for ScriptedStatusReader {
    type Error = ScriptedError;

    fn query_attachment<'a>(
        &'a self,
        _instance: &'a InstanceRef,
        _volume: &'a VolumeRef,
    ) -> BackendFuture<'a, AttachmentStatus, Self::Error> {
        match self.next() {
            Reply::Ready(result) => Box::pin(async move { result }),
            Reply::Hang => {
                Box::pin(std::future::pending::<Result<AttachmentStatus, ScriptedError>>())
            }
        }
    }
}

/// Kind of mutation recorded by [`RecordingMutator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationKind {
    /// An attach request.
    Attach,
    /// A detach request.
    Detach,
}

/// A mutation received by [`RecordingMutator`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MutationCall {
    /// Request kind.
    pub kind: MutationKind,
    /// Instance named in the request.
    pub instance: InstanceRef,
    /// Volume named in the request.
    pub volume: VolumeRef,
}

/// Mutator that records requests and optionally rejects them.
#[derive(Clone, Debug, Default)]
pub struct RecordingMutator {
    calls: Arc<Mutex<Vec<MutationCall>>>,
    rejection: Arc<Mutex<Option<String>>>,
    hanging: Arc<Mutex<bool>>,
}

impl RecordingMutator {
    /// Creates a mutator that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every subsequent request with `message`.
    pub fn reject_with(&self, message: &str) {
        *lock(&self.rejection) = Some(message.to_owned());
    }

    /// Leaves every subsequent request unanswered.
    pub fn hang(&self) {
        *lock(&self.hanging) = true;
    }

    /// Returns a snapshot of the requests received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MutationCall> {
        lock(&self.calls).clone()
    }

    fn record(
        &self,
        kind: MutationKind,
        instance: &InstanceRef,
        volume: &VolumeRef,
    ) -> BackendFuture<'static, (), ScriptedError> {
        lock(&self.calls).push(MutationCall {
            kind,
            instance: instance.clone(),
            volume: volume.clone(),
        });
        if *lock(&self.hanging) {
            return Box::pin(std::future::pending::<Result<(), ScriptedError>>());
        }
        let result = lock(&self.rejection)
            .clone()
            .map_or(Ok(()), |message| Err(ScriptedError(message)));
        Box::pin(async move { result })
    }
}

impl Mutator for RecordingMutator {
    type Error = ScriptedError;

    fn request_attach<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, (), Self::Error> {
        self.record(MutationKind::Attach, instance, volume)
    }

    fn request_detach<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, (), Self::Error> {
        self.record(MutationKind::Detach, instance, volume)
    }
}

const DEVICE_LETTERS: &str = "bcdefghijklmnopqrstuvwxyz";

#[derive(Clone, Debug)]
struct SimulatedPair {
    state: AttachmentState,
    polls_remaining: usize,
    device_path: Option<DevicePath>,
}

#[derive(Debug, Default)]
struct CloudState {
    pairs: HashMap<(InstanceRef, VolumeRef), SimulatedPair>,
    next_device: usize,
}

/// Deterministic in-memory backend that implements both capabilities.
///
/// Requests move a pair into a transitional state that settles after a
/// fixed number of status queries. Device paths are handed out as
/// `/dev/vdb`, `/dev/vdc`, and so on.
#[derive(Clone, Debug, Default)]
pub struct SimulatedCloud {
    state: Arc<Mutex<CloudState>>,
    settle_polls: usize,
}

impl SimulatedCloud {
    /// Creates a cloud whose transitions settle after `settle_polls` queries.
    #[must_use]
    pub fn new(settle_polls: usize) -> Self {
        Self {
            state: Arc::default(),
            settle_polls,
        }
    }

    /// Returns the state the pair would report without advancing it.
    #[must_use]
    pub fn state_of(&self, instance: &InstanceRef, volume: &VolumeRef) -> AttachmentState {
        lock(&self.state)
            .pairs
            .get(&(instance.clone(), volume.clone()))
            .map_or(AttachmentState::Detached, |pair| pair.state.clone())
    }

    fn begin(&self, instance: &InstanceRef, volume: &VolumeRef, state: AttachmentState) {
        let mut cloud = lock(&self.state);
        let device_path = if state == AttachmentState::Attaching {
            let letter = DEVICE_LETTERS
                .chars()
                .cycle()
                .nth(cloud.next_device)
                .unwrap_or('b');
            cloud.next_device += 1;
            Some(DevicePath::new(format!("/dev/vd{letter}")))
        } else {
            None
        };
        let entry = cloud
            .pairs
            .entry((instance.clone(), volume.clone()))
            .or_insert(SimulatedPair {
                state: AttachmentState::Detached,
                polls_remaining: 0,
                device_path: None,
            });
        entry.state = state;
        entry.polls_remaining = self.settle_polls;
        if device_path.is_some() {
            entry.device_path = device_path;
        }
    }

    fn advance(&self, instance: &InstanceRef, volume: &VolumeRef) -> AttachmentStatus {
        let mut cloud = lock(&self.state);
        let Some(pair) = cloud.pairs.get_mut(&(instance.clone(), volume.clone())) else {
            return AttachmentStatus::in_state(AttachmentState::Detached);
        };
        if pair.polls_remaining > 0 {
            pair.polls_remaining -= 1;
        } else {
            let settled = match &pair.state {
                AttachmentState::Attaching => AttachmentState::Attached,
                AttachmentState::Detaching => AttachmentState::Detached,
                other => other.clone(),
            };
            if settled == AttachmentState::Detached {
                pair.device_path = None;
            }
            pair.state = settled;
        }
        let device_path = if pair.state == AttachmentState::Attached {
            pair.device_path.clone()
        } else {
            None
        };
        AttachmentStatus {
            state: pair.state.clone(),
            device_path,
        }
    }
}

impl Mutator for SimulatedCloud {
    type Error = ScriptedError;

    fn request_attach<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, (), Self::Error> {
        self.begin(instance, volume, AttachmentState::Attaching);
        Box::pin(async { Ok::<(), ScriptedError>(()) })
    }

    fn request_detach<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, (), Self::Error> {
        self.begin(instance, volume, AttachmentState::Detaching);
        Box::pin(async { Ok::<(), ScriptedError>(()) })
    }
}

impl StatusReader for SimulatedCloud {
    type Error = ScriptedError;

    fn query_attachment<'a>(
        &'a self,
        instance: &'a InstanceRef,
        volume: &'a VolumeRef,
    ) -> BackendFuture<'a, AttachmentStatus, Self::Error> {
        let status = self.advance(instance, volume);
        Box::pin(async move { Ok(status) })
    }
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Command runner that returns pre-seeded outputs in FIFO order.
///
/// An exhausted queue answers with a successful, empty output.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<Reply<Result<CommandOutput, CommandError>>>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Queues an output with the given exit code and streams.
    pub fn push_output(&self, code: Option<i32>, stdout: &str, stderr: &str) {
        lock(&self.responses).push_back(Reply::Ready(Ok(CommandOutput {
            code,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        })));
    }

    /// Queues a successful exit with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Queues a spawn failure.
    pub fn push_spawn_failure(&self, program: &str, message: &str) {
        lock(&self.responses).push_back(Reply::Ready(Err(CommandError::Spawn {
            program: program.to_owned(),
            message: message.to_owned(),
        })));
    }

    /// Queues a command that never exits.
    pub fn push_hang(&self) {
        lock(&self.responses).push_back(Reply::Hang);
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let queued = lock(&self.responses).pop_front();
        match queued {
            Some(Reply::Ready(result)) => Box::pin(async move { result }),
            Some(Reply::Hang) => {
                Box::pin(std::future::pending::<Result<CommandOutput, CommandError>>())
            }
            None => Box::pin(async {
                Ok::<CommandOutput, CommandError>(CommandOutput {
                    code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }),
        }
    }
}
