//! Polling loop shared by every waiting operation.

use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::backend::{AttachmentRecord, AttachmentState, AttachmentStatus, Mutator, StatusReader};
use crate::config::MAX_WAIT_TIMEOUT;
use crate::types::{InstanceRef, VolumeRef};

use super::{AttachmentCoordinator, CoordinatorError, Direction};

/// What a single observation means for the loop.
enum Step {
    Done,
    Failed,
    Pending,
}

fn step(direction: Direction, status: &AttachmentStatus) -> Step {
    match (direction, &status.state) {
        (_, AttachmentState::Error) => Step::Failed,
        (Direction::Attach, AttachmentState::Attached) if status.device_path.is_some() => {
            Step::Done
        }
        (Direction::Detach, AttachmentState::Detached) => Step::Done,
        _ => Step::Pending,
    }
}

/// Outcome of one query cycle.
pub(super) enum Queried {
    Status(AttachmentStatus),
    /// The deadline passed before any attempt produced a status.
    DeadlinePassed { attempts: u32 },
}

impl<M, S> AttachmentCoordinator<M, S>
where
    M: Mutator,
    S: StatusReader,
{
    /// Deadline for a call entered now. Timeouts beyond [`MAX_WAIT_TIMEOUT`]
    /// are clamped.
    pub(super) fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.policy.wait_timeout.min(MAX_WAIT_TIMEOUT))
            .unwrap_or(now)
    }

    /// Polls until `direction` reaches its terminal state, the backend
    /// reports an error, or `deadline` passes.
    pub(super) async fn poll_until(
        &self,
        direction: Direction,
        instance: &InstanceRef,
        volume: &VolumeRef,
        deadline: Instant,
    ) -> Result<AttachmentRecord, CoordinatorError> {
        let action = direction.action();
        let mut record = AttachmentRecord::new(instance, volume);
        let mut polls: u32 = 0;
        let mut saw_attached_without_path = false;

        if self.cancel.is_cancelled() {
            return Err(cancelled(action, instance, volume));
        }

        while Instant::now() <= deadline {
            let Queried::Status(status) = self
                .query_with_retry(action, instance, volume, deadline)
                .await?
            else {
                break;
            };
            polls += 1;
            debug!(%instance, %volume, poll = polls, state = %status.state, "observed attachment state");

            if let AttachmentState::Unrecognised(raw) = &status.state {
                warn!(%instance, %volume, status = %raw, "unrecognised attachment status, still waiting");
            }
            let outcome = step(direction, &status);
            if direction == Direction::Attach
                && status.state == AttachmentState::Attached
                && status.device_path.is_none()
            {
                saw_attached_without_path = true;
            }
            record.observe(status);

            match outcome {
                Step::Done => {
                    info!(%instance, %volume, polls, "volume {action} complete");
                    return Ok(record);
                }
                Step::Failed => {
                    warn!(%instance, %volume, polls, "backend reported error during {action}");
                    return Err(direction.failed(instance, volume));
                }
                Step::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let pause = self.policy.poll_interval.min(deadline - now);
            self.pause(pause, action, instance, volume).await?;
        }

        warn!(%instance, %volume, polls, "deadline passed waiting for {action}");
        if saw_attached_without_path {
            return Err(CoordinatorError::MissingDevicePath {
                instance: instance.clone(),
                volume: volume.clone(),
            });
        }
        Err(direction.timeout(instance, volume, &self.policy))
    }

    /// Issues one status query, retrying transient failures up to the
    /// configured attempt count. No attempt starts after `deadline`, and an
    /// attempt still pending at `deadline` is abandoned.
    pub(super) async fn query_with_retry(
        &self,
        action: &str,
        instance: &InstanceRef,
        volume: &VolumeRef,
        deadline: Instant,
    ) -> Result<Queried, CoordinatorError> {
        let attempts = self.policy.query_attempts.max(1);
        let mut attempt = 1;
        loop {
            if Instant::now() > deadline {
                return Ok(Queried::DeadlinePassed {
                    attempts: attempt - 1,
                });
            }
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(cancelled(action, instance, volume));
                }
                result = self.reader.query_attachment(instance, volume) => result,
                () = sleep_until(deadline) => {
                    warn!(%instance, %volume, attempt, "status query still pending at deadline");
                    return Ok(Queried::DeadlinePassed { attempts: attempt });
                }
            };

            match result {
                Ok(status) => return Ok(Queried::Status(status)),
                Err(err) if attempt < attempts => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(%instance, %volume, attempt, error = %err, "status query failed at deadline");
                        return Ok(Queried::DeadlinePassed { attempts: attempt });
                    }
                    warn!(%instance, %volume, attempt, error = %err, "status query failed, retrying");
                    let pause = self.policy.query_retry_delay.min(deadline - now);
                    self.pause(pause, action, instance, volume).await?;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(CoordinatorError::BackendUnavailable {
                        instance: instance.clone(),
                        volume: volume.clone(),
                        attempts,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    async fn pause(
        &self,
        duration: Duration,
        action: &str,
        instance: &InstanceRef,
        volume: &VolumeRef,
    ) -> Result<(), CoordinatorError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(cancelled(action, instance, volume)),
            () = sleep(duration) => Ok(()),
        }
    }
}

pub(super) fn cancelled(
    action: &str,
    instance: &InstanceRef,
    volume: &VolumeRef,
) -> CoordinatorError {
    info!(%instance, %volume, "{action} cancelled");
    CoordinatorError::OperationCancelled {
        action: action.to_owned(),
        instance: instance.clone(),
        volume: volume.clone(),
    }
}
