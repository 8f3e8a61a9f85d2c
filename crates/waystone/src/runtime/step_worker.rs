//! Handler for step queue messages.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::registry::Registry;
use super::router::{HandlerResponse, MessageMeta, QueueHandler};
use crate::error::Result;
use crate::event::{FailureInfo, FailureKind, RunEvent, RunState, RunStatus};
use crate::executor::{StepJob, panic_message, wake_message};
use crate::step::{RetryPolicy, StepContext, StepError};
use crate::world::{BeginResult, UnitOfWork, World};

/// How a step call attempt ended.
#[derive(Debug)]
enum Resolution {
    Completed(Value),
    Failed(FailureInfo),
    Retry {
        attempt: u32,
        error: String,
        delay: Duration,
    },
}

/// Executes step jobs claimed from `__wkf_step_` queues.
///
/// # Lifecycle
///
/// 1. Under the run lock, check the call still needs a result; duplicate
///    deliveries of a finished call are acknowledged without running it
/// 2. Release the lock and run the step
/// 3. Re-acquire the lock and record the first terminal result, or a
///    `StepRetrying` event and a delayed redelivery
/// 4. Wake the workflow once the call has a terminal result
pub(crate) struct StepHandler<W: World> {
    world: W,
    registry: Arc<Registry>,
    retry_policy: RetryPolicy,
}

impl<W: World> StepHandler<W> {
    pub fn new(world: W, registry: Arc<Registry>, retry_policy: RetryPolicy) -> Self {
        Self {
            world,
            registry,
            retry_policy,
        }
    }

    /// The attempt number to run, or `None` if the call needs no execution.
    async fn pending_attempt(&self, job: &StepJob) -> Result<Option<u32>> {
        let events = match self.world.begin(&job.run_id).await? {
            BeginResult::Active { events, uow, .. } => {
                drop(uow);
                events
            }
            BeginResult::Finished(run) => {
                debug!(run_id = %job.run_id, seq = job.seq, status = %run.status, "Run finished, discarding step job");
                return Ok(None);
            }
        };

        let state = RunState::replay(events);
        match state.step(job.seq) {
            None => {
                warn!(run_id = %job.run_id, seq = job.seq, "Step job has no scheduled call, discarding");
                Ok(None)
            }
            Some(record) if record.outcome.is_terminal() => {
                debug!(run_id = %job.run_id, seq = job.seq, "Duplicate delivery of finished step, discarding");
                Ok(None)
            }
            Some(record) => Ok(Some(record.next_attempt())),
        }
    }

    async fn execute(&self, job: &StepJob, attempt: u32, meta: &MessageMeta) -> Result<Resolution> {
        let Some((step_id, entry)) = self.registry.step(&job.step_id) else {
            warn!(run_id = %job.run_id, seq = job.seq, step_id = %job.step_id, "Step is not registered");
            return Ok(Resolution::Failed(FailureInfo::new(
                FailureKind::InvalidInvocation,
                format!("step {} is not registered", job.step_id),
            )));
        };

        let ctx = StepContext {
            run_id: job.run_id.clone(),
            seq: job.seq,
            step_id: step_id.clone(),
            attempt,
            message_id: meta.message_id,
            closure: job.closure.clone(),
            streams: Arc::new(self.world.clone()),
        };

        debug!(run_id = %job.run_id, seq = job.seq, step_id = %step_id, attempt, "Executing step");
        let result = match AssertUnwindSafe(entry.call(job.input.clone(), &ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(StepError::retryable(format!(
                "step panicked: {}",
                panic_message(&*panic)
            ))),
        };

        let policy = entry
            .retry_policy()
            .unwrap_or_else(|| self.retry_policy.clone());

        Ok(match result {
            Ok(output) => Resolution::Completed(output),
            Err(StepError::Fatal { message }) => {
                Resolution::Failed(FailureInfo::new(FailureKind::Fatal, message))
            }
            Err(StepError::Retryable {
                message,
                retry_after,
            }) if policy.should_retry(attempt) => Resolution::Retry {
                attempt,
                delay: retry_after.unwrap_or_else(|| policy.backoff_duration(attempt)),
                error: message,
            },
            Err(StepError::Retryable { message, .. }) => Resolution::Failed(FailureInfo::new(
                FailureKind::RetriesExhausted,
                format!("{message} (gave up after {attempt} attempts)"),
            )),
        })
    }

    /// Record the resolution unless another delivery got there first.
    async fn record(&self, job: &StepJob, resolution: Resolution) -> Result<HandlerResponse> {
        let (run, events, mut uow) = match self.world.begin(&job.run_id).await? {
            BeginResult::Active { run, events, uow } => (run, events, uow),
            BeginResult::Finished(_) => return Ok(HandlerResponse::done()),
        };

        let state = RunState::replay(events);
        let Some(record) = state.step(job.seq).filter(|r| !r.outcome.is_terminal()) else {
            debug!(run_id = %job.run_id, seq = job.seq, "Step already resolved, discarding result");
            return Ok(HandlerResponse::done());
        };

        let event = match resolution {
            Resolution::Completed(output) => {
                debug!(run_id = %job.run_id, seq = job.seq, "Step completed");
                RunEvent::StepCompleted {
                    seq: job.seq,
                    output,
                }
            }
            Resolution::Failed(error) => {
                info!(run_id = %job.run_id, seq = job.seq, error = %error.message, "Step failed");
                RunEvent::StepFailed {
                    seq: job.seq,
                    error,
                }
            }
            Resolution::Retry {
                attempt,
                error,
                delay,
            } => {
                if record.retries < attempt {
                    warn!(
                        run_id = %job.run_id,
                        seq = job.seq,
                        attempt,
                        error = %error,
                        delay = ?delay,
                        "Step failed, will retry"
                    );
                    uow.append_events(vec![RunEvent::StepRetrying {
                        seq: job.seq,
                        attempt,
                        error,
                        retry_after_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    }])
                    .await?;
                    uow.commit().await?;
                }
                return Ok(HandlerResponse::retry_after(delay));
            }
        };

        uow.append_events(vec![event]).await?;
        uow.enqueue(
            wake_message(&run.workflow_id, &job.run_id, None)?
                .idempotency_key(format!("{}:done", job.idempotency_key())),
        )
        .await?;
        uow.set_status(RunStatus::Running);
        uow.commit().await?;
        Ok(HandlerResponse::done())
    }
}

#[async_trait]
impl<W: World> QueueHandler for StepHandler<W> {
    async fn handle(&self, payload: Value, meta: MessageMeta) -> Result<HandlerResponse> {
        let job: StepJob = serde_json::from_value(payload)?;

        let Some(attempt) = self.pending_attempt(&job).await? else {
            return Ok(HandlerResponse::done());
        };

        let resolution = self.execute(&job, attempt, &meta).await?;
        self.record(&job, resolution).await
    }
}
