//! Execution of a single workflow turn.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::closure::ClosureVars;
use crate::error::{Error, Result};
use crate::event::{FailureInfo, FailureKind, RunEvent, RunState, RunStatus};
use crate::id::{FunctionId, RunId, WORKFLOW_QUEUE_PREFIX};
use crate::runtime::registry::Registry;
use crate::workflow::{Command, WorkflowContext};
use crate::world::{BeginResult, HookRecord, OutgoingMessage, RunQueryStore, Store, UnitOfWork};

/// Payload of a message on a workflow queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkflowWake {
    pub run_id: RunId,
    /// Set when the message ends a durable sleep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seq: Option<u32>,
}

/// Payload of a message on a step queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StepJob {
    pub run_id: RunId,
    pub seq: u32,
    pub step_id: String,
    pub input: Value,
    #[serde(default)]
    pub closure: ClosureVars,
}

impl StepJob {
    pub(crate) fn idempotency_key(&self) -> String {
        format!("{}:{}", self.run_id, self.seq)
    }
}

/// Build the message that runs the next turn of a run.
pub(crate) fn wake_message(
    workflow_id: &str,
    run_id: &RunId,
    wait_seq: Option<u32>,
) -> Result<OutgoingMessage> {
    let wake = WorkflowWake {
        run_id: run_id.clone(),
        wait_seq,
    };
    Ok(OutgoingMessage::new(
        format!("{WORKFLOW_QUEUE_PREFIX}{workflow_id}"),
        serde_json::to_value(wake)?,
    ))
}

/// Extract a readable message from a caught panic.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnOutcome {
    /// The run was already terminal.
    Skipped,
    Suspended,
    Completed,
    Failed,
    /// A sleep wake arrived before its resume time.
    Early(Duration),
}

/// Replay state plus the events this turn adds to it.
struct TurnLog {
    state: RunState,
    events: Vec<RunEvent>,
}

impl TurnLog {
    fn record(&mut self, event: RunEvent) {
        self.state = std::mem::take(&mut self.state).evolve(event.clone());
        self.events.push(event);
    }
}

/// Execute one turn of a run.
///
/// This function:
/// 1. Begins a unit of work (acquires the run lock, loads the log)
/// 2. Skips runs that are already terminal
/// 3. Replays the log into [`RunState`]
/// 4. Polls the workflow body once against a [`WorkflowContext`]
/// 5. Persists new calls with their queue messages, or the run's result
/// 6. Commits
///
/// A body that returns `Poll::Pending` is suspended; its new durable calls
/// are scheduled in the same transaction that records them.
pub(crate) async fn execute_turn<S>(
    store: &S,
    registry: &Registry,
    run_id: &RunId,
    wait_seq: Option<u32>,
) -> Result<TurnOutcome>
where
    S: Store + RunQueryStore,
{
    let (run, events, uow) = match store.begin(run_id).await? {
        BeginResult::Active { run, events, uow } => (run, events, uow),
        BeginResult::Finished(run) => {
            debug!(run_id = %run_id, status = %run.status, "Run already finished, skipping turn");
            return Ok(TurnOutcome::Skipped);
        }
    };

    let mut log = TurnLog {
        state: RunState::replay(events),
        events: Vec::new(),
    };
    if !log.state.has_started() {
        log.record(RunEvent::RunStarted);
    }

    if let Some(seq) = wait_seq {
        if let Some(wait) = log.state.wait(seq).filter(|wait| !wait.completed) {
            let now = OffsetDateTime::now_utc();
            if wait.resume_at > now {
                let remaining = Duration::try_from(wait.resume_at - now).unwrap_or_default();
                debug!(run_id = %run_id, seq, ?remaining, "Sleep wake arrived early");
                return Ok(TurnOutcome::Early(remaining));
            }
            log.record(RunEvent::WaitCompleted { seq });
        }
    }

    let Some((workflow_id, entry)) = registry.workflow(&run.workflow_id) else {
        let failure = FailureInfo::new(
            FailureKind::InvalidInvocation,
            format!("workflow {} is not registered", run.workflow_id),
        );
        return finish(log, uow, run_id, Err(failure)).await;
    };

    let snapshot = Arc::new(log.state.clone());
    let ctx = WorkflowContext::new(run_id.clone(), workflow_id.clone(), Arc::clone(&snapshot));
    let polled = AssertUnwindSafe(entry.run(&ctx, snapshot.input.clone()))
        .catch_unwind()
        .now_or_never();
    let turn = ctx.finish_turn();

    if let Some((seq, message)) = turn.divergence {
        warn!(run_id = %run_id, seq, %message, "Workflow diverged from its replay log");
        let failure = FailureInfo::new(
            FailureKind::ReplayDivergence,
            Error::ReplayDivergence { seq, message }.to_string(),
        );
        return finish(log, uow, run_id, Err(failure)).await;
    }

    match polled {
        None => suspend(store, log, uow, run_id, workflow_id, turn.commands).await,
        Some(Ok(Ok(output))) => finish(log, uow, run_id, Ok(output)).await,
        Some(Ok(Err(error))) => finish(log, uow, run_id, Err(FailureInfo::from_error(&error))).await,
        Some(Err(panic)) => {
            let failure = FailureInfo::new(
                FailureKind::Workflow,
                format!("workflow panicked: {}", panic_message(&*panic)),
            );
            finish(log, uow, run_id, Err(failure)).await
        }
    }
}

/// Persist the calls issued by a suspended body.
async fn suspend<S, U>(
    store: &S,
    mut log: TurnLog,
    mut uow: U,
    run_id: &RunId,
    workflow_id: &FunctionId,
    commands: Vec<Command>,
) -> Result<TurnOutcome>
where
    S: RunQueryStore,
    U: UnitOfWork,
{
    if let Some(token) = conflicting_hook(store, &log.state, &commands).await? {
        let failure = FailureInfo::new(FailureKind::Fatal, Error::HookConflict(token).to_string());
        return finish(log, uow, run_id, Err(failure)).await;
    }

    let now = OffsetDateTime::now_utc();
    let mut new_hooks: Vec<HookRecord> = Vec::new();
    let mut disposed = Vec::new();

    for command in commands {
        match command {
            Command::ScheduleStep {
                seq,
                step_id,
                input,
                closure,
            } => {
                let job = StepJob {
                    run_id: run_id.clone(),
                    seq,
                    step_id: step_id.to_string(),
                    input: input.clone(),
                    closure: closure.clone(),
                };
                let message = OutgoingMessage::new(step_id.queue_name(), serde_json::to_value(&job)?)
                    .idempotency_key(job.idempotency_key());
                uow.enqueue(message).await?;
                debug!(run_id = %run_id, seq, step_id = %step_id, "Scheduled step");
                log.record(RunEvent::StepScheduled {
                    seq,
                    step_id: job.step_id,
                    input,
                    closure,
                });
            }
            Command::CreateHook {
                seq,
                token,
                schema,
                metadata,
            } => {
                debug!(run_id = %run_id, seq, token = %token, "Created hook");
                log.record(RunEvent::HookCreated {
                    seq,
                    token: token.clone(),
                    metadata: metadata.clone(),
                });
                new_hooks.push(HookRecord {
                    token,
                    run_id: run_id.clone(),
                    seq,
                    schema,
                    metadata,
                    created_at: now,
                });
            }
            Command::DisposeHook { token } => {
                if !log.state.hook(&token).is_some_and(|hook| !hook.disposed) {
                    continue;
                }
                log.record(RunEvent::HookDisposed {
                    token: token.clone(),
                });
                match new_hooks.iter().position(|hook| hook.token == token) {
                    Some(index) => {
                        new_hooks.remove(index);
                    }
                    None => disposed.push(token),
                }
            }
            Command::Sleep { seq, resume_at } => {
                let delay = Duration::try_from(resume_at - now).unwrap_or_default();
                let message = wake_message(workflow_id.as_str(), run_id, Some(seq))?
                    .delay(delay)
                    .idempotency_key(format!("{run_id}:wait:{seq}"));
                uow.enqueue(message).await?;
                debug!(run_id = %run_id, seq, ?delay, "Started sleep");
                log.record(RunEvent::WaitCreated { seq, resume_at });
            }
        }
    }

    if !disposed.is_empty() {
        uow.dispose_hooks(disposed).await?;
    }
    for hook in new_hooks {
        uow.register_hook(hook).await?;
    }
    uow.append_events(log.events).await?;
    uow.set_status(RunStatus::Suspended);
    uow.commit().await?;

    debug!(run_id = %run_id, "Run suspended");
    Ok(TurnOutcome::Suspended)
}

/// Find a hook token requested this turn that is already held elsewhere.
async fn conflicting_hook<S: RunQueryStore>(
    store: &S,
    state: &RunState,
    commands: &[Command],
) -> Result<Option<String>> {
    let mut requested = HashSet::new();
    let mut released: HashSet<&str> = HashSet::new();
    for command in commands {
        match command {
            Command::DisposeHook { token } => {
                released.insert(token.as_str());
            }
            Command::CreateHook { token, .. } => {
                let live_here = state.hook(token).is_some_and(|hook| !hook.disposed)
                    && !released.contains(token.as_str());
                if live_here || !requested.insert(token.as_str()) {
                    return Ok(Some(token.clone()));
                }
                let held = store.find_hook(token).await?.is_some();
                if held && !released.contains(token.as_str()) {
                    return Ok(Some(token.clone()));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Record the run's result, releasing every live hook.
async fn finish<U: UnitOfWork>(
    mut log: TurnLog,
    mut uow: U,
    run_id: &RunId,
    result: std::result::Result<Value, FailureInfo>,
) -> Result<TurnOutcome> {
    let live = log.state.live_hook_tokens();
    for token in &live {
        log.record(RunEvent::HookDisposed {
            token: token.clone(),
        });
    }

    let outcome = match result {
        Ok(output) => {
            log.record(RunEvent::RunCompleted {
                output: output.clone(),
            });
            uow.set_status(RunStatus::Completed);
            uow.set_output(output);
            info!(run_id = %run_id, "Run completed");
            TurnOutcome::Completed
        }
        Err(error) => {
            log.record(RunEvent::RunFailed {
                error: error.clone(),
            });
            warn!(run_id = %run_id, kind = ?error.kind, error = %error.message, "Run failed");
            uow.set_status(RunStatus::Failed);
            uow.set_error(error);
            TurnOutcome::Failed
        }
    };

    if !live.is_empty() {
        uow.dispose_hooks(live).await?;
    }
    uow.append_events(log.events).await?;
    uow.commit().await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn step_job_payload_is_camel_case() {
        let job = StepJob {
            run_id: RunId::new("wrun_1"),
            seq: 2,
            step_id: "step//a.js//w/s".into(),
            input: json!([1]),
            closure: ClosureVars::new(),
        };

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["runId"], "wrun_1");
        assert_eq!(value["stepId"], "step//a.js//w/s");
        assert_eq!(job.idempotency_key(), "wrun_1:2");
    }

    #[test]
    fn wake_message_targets_the_workflow_queue() {
        let message = wake_message("workflow//a.js//w", &RunId::new("r"), Some(3)).unwrap();

        assert_eq!(message.queue_name, "__wkf_workflow_workflow//a.js//w");
        assert_eq!(message.payload, json!({ "runId": "r", "waitSeq": 3 }));
    }

    #[test]
    fn panic_messages_are_extracted() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*caught), "boom 1");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(&*caught), "unknown panic");
    }
}
