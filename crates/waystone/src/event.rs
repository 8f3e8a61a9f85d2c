//! Run events and the replay state folded from them.
//!
//! Every durable decision a run makes is recorded as a [`RunEvent`] in the
//! run's append-only log. [`RunState`] is rebuilt by folding the log with
//! [`RunState::evolve`]; the workflow engine replays it on every turn.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::closure::ClosureVars;
use crate::error::Error;

/// Lifecycle status of a run.
///
/// ```text
/// pending → running → (suspended ↔ running)* → completed | failed | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Suspended => "suspended",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal runs ignore further messages.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "suspended" => RunStatus::Suspended,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            other => return Err(Error::fatal(format!("unknown run status `{other}`"))),
        })
    }
}

/// Classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Raised explicitly as non-retryable.
    Fatal,
    /// A retryable failure that used up its retry budget.
    RetriesExhausted,
    /// The target function is not registered.
    InvalidInvocation,
    /// The workflow body no longer matches its replay log.
    ReplayDivergence,
    /// The workflow body returned an error or panicked.
    Workflow,
}

/// A recorded failure, stored in the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureInfo {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an error returned by a workflow body.
    pub fn from_error(error: &Error) -> Self {
        let kind = match error {
            Error::Fatal(_) | Error::StepFailed { .. } => FailureKind::Fatal,
            Error::InvalidInvocation(_) => FailureKind::InvalidInvocation,
            Error::ReplayDivergence { .. } => FailureKind::ReplayDivergence,
            _ => FailureKind::Workflow,
        };
        Self::new(kind, error.to_string())
    }
}

/// A fact recorded in a run's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    RunCreated {
        workflow_id: String,
        input: Value,
    },
    RunStarted,
    StepScheduled {
        seq: u32,
        step_id: String,
        input: Value,
        #[serde(default, skip_serializing_if = "ClosureVars::is_empty")]
        closure: ClosureVars,
    },
    StepRetrying {
        seq: u32,
        attempt: u32,
        error: String,
        retry_after_ms: u64,
    },
    StepCompleted {
        seq: u32,
        output: Value,
    },
    StepFailed {
        seq: u32,
        error: FailureInfo,
    },
    HookCreated {
        seq: u32,
        token: String,
        #[serde(default)]
        metadata: Value,
    },
    HookReceived {
        token: String,
        payload: Value,
        #[serde(default)]
        terminal: bool,
    },
    HookDisposed {
        token: String,
    },
    WaitCreated {
        seq: u32,
        #[serde(with = "time::serde::rfc3339")]
        resume_at: OffsetDateTime,
    },
    WaitCompleted {
        seq: u32,
    },
    RunCompleted {
        output: Value,
    },
    RunFailed {
        error: FailureInfo,
    },
    RunCancelled,
}

impl RunEvent {
    /// The `type` tag this event serializes with.
    pub fn type_name(&self) -> &'static str {
        match self {
            RunEvent::RunCreated { .. } => "RunCreated",
            RunEvent::RunStarted => "RunStarted",
            RunEvent::StepScheduled { .. } => "StepScheduled",
            RunEvent::StepRetrying { .. } => "StepRetrying",
            RunEvent::StepCompleted { .. } => "StepCompleted",
            RunEvent::StepFailed { .. } => "StepFailed",
            RunEvent::HookCreated { .. } => "HookCreated",
            RunEvent::HookReceived { .. } => "HookReceived",
            RunEvent::HookDisposed { .. } => "HookDisposed",
            RunEvent::WaitCreated { .. } => "WaitCreated",
            RunEvent::WaitCompleted { .. } => "WaitCompleted",
            RunEvent::RunCompleted { .. } => "RunCompleted",
            RunEvent::RunFailed { .. } => "RunFailed",
            RunEvent::RunCancelled => "RunCancelled",
        }
    }
}

/// Outcome of a step call as seen from the log.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Pending,
    Completed(Value),
    Failed(FailureInfo),
}

impl StepOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::Pending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step_id: String,
    pub input: Value,
    pub closure: ClosureVars,
    /// Failed attempts recorded so far.
    pub retries: u32,
    pub last_error: Option<String>,
    pub outcome: StepOutcome,
}

impl StepRecord {
    /// The attempt number the next execution runs as (1-based).
    pub fn next_attempt(&self) -> u32 {
        self.retries + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookEventRecord {
    pub payload: Value,
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookState {
    pub seq: u32,
    pub token: String,
    pub metadata: Value,
    pub events: Vec<HookEventRecord>,
    pub disposed: bool,
}

impl HookState {
    /// Closed hooks accept no further events.
    pub fn is_closed(&self) -> bool {
        self.disposed || self.events.last().is_some_and(|e| e.terminal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitState {
    pub resume_at: OffsetDateTime,
    pub completed: bool,
}

/// A durable call slot, keyed by call sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum CallRecord {
    Step(StepRecord),
    Hook { token: String },
    Wait(WaitState),
}

impl CallRecord {
    pub fn kind_name(&self) -> &'static str {
        match self {
            CallRecord::Step(_) => "step",
            CallRecord::Hook { .. } => "hook",
            CallRecord::Wait(_) => "sleep",
        }
    }
}

/// State of a run rebuilt from its event log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub workflow_id: Option<String>,
    pub input: Value,
    pub status: RunStatus,
    pub calls: BTreeMap<u32, CallRecord>,
    pub hooks: BTreeMap<String, HookState>,
    pub output: Option<Value>,
    pub error: Option<FailureInfo>,
}

impl RunState {
    /// Fold a sequence of events into state.
    pub fn replay<I>(events: I) -> Self
    where
        I: IntoIterator<Item = RunEvent>,
    {
        events.into_iter().fold(Self::default(), Self::evolve)
    }

    /// Apply one event.
    ///
    /// Events referring to unknown call slots are ignored, which keeps the
    /// fold total for logs written by older versions.
    pub fn evolve(mut self, event: RunEvent) -> Self {
        match event {
            RunEvent::RunCreated { workflow_id, input } => {
                self.workflow_id = Some(workflow_id);
                self.input = input;
                self.status = RunStatus::Pending;
            }
            RunEvent::RunStarted => {
                self.status = RunStatus::Running;
            }
            RunEvent::StepScheduled {
                seq,
                step_id,
                input,
                closure,
            } => {
                self.calls.insert(
                    seq,
                    CallRecord::Step(StepRecord {
                        step_id,
                        input,
                        closure,
                        retries: 0,
                        last_error: None,
                        outcome: StepOutcome::Pending,
                    }),
                );
            }
            RunEvent::StepRetrying {
                seq,
                attempt,
                error,
                ..
            } => {
                if let Some(CallRecord::Step(step)) = self.calls.get_mut(&seq) {
                    step.retries = step.retries.max(attempt);
                    step.last_error = Some(error);
                }
            }
            RunEvent::StepCompleted { seq, output } => {
                if let Some(CallRecord::Step(step)) = self.calls.get_mut(&seq) {
                    step.outcome = StepOutcome::Completed(output);
                }
            }
            RunEvent::StepFailed { seq, error } => {
                if let Some(CallRecord::Step(step)) = self.calls.get_mut(&seq) {
                    step.outcome = StepOutcome::Failed(error);
                }
            }
            RunEvent::HookCreated {
                seq,
                token,
                metadata,
            } => {
                self.calls.insert(
                    seq,
                    CallRecord::Hook {
                        token: token.clone(),
                    },
                );
                self.hooks.insert(
                    token.clone(),
                    HookState {
                        seq,
                        token,
                        metadata,
                        events: Vec::new(),
                        disposed: false,
                    },
                );
            }
            RunEvent::HookReceived {
                token,
                payload,
                terminal,
            } => {
                if let Some(hook) = self.hooks.get_mut(&token) {
                    hook.events.push(HookEventRecord { payload, terminal });
                }
            }
            RunEvent::HookDisposed { token } => {
                if let Some(hook) = self.hooks.get_mut(&token) {
                    hook.disposed = true;
                }
            }
            RunEvent::WaitCreated { seq, resume_at } => {
                self.calls.insert(
                    seq,
                    CallRecord::Wait(WaitState {
                        resume_at,
                        completed: false,
                    }),
                );
            }
            RunEvent::WaitCompleted { seq } => {
                if let Some(CallRecord::Wait(wait)) = self.calls.get_mut(&seq) {
                    wait.completed = true;
                }
            }
            RunEvent::RunCompleted { output } => {
                self.status = RunStatus::Completed;
                self.output = Some(output);
            }
            RunEvent::RunFailed { error } => {
                self.status = RunStatus::Failed;
                self.error = Some(error);
            }
            RunEvent::RunCancelled => {
                self.status = RunStatus::Cancelled;
            }
        }
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_started(&self) -> bool {
        self.status != RunStatus::Pending
    }

    pub fn step(&self, seq: u32) -> Option<&StepRecord> {
        match self.calls.get(&seq) {
            Some(CallRecord::Step(step)) => Some(step),
            _ => None,
        }
    }

    pub fn wait(&self, seq: u32) -> Option<&WaitState> {
        match self.calls.get(&seq) {
            Some(CallRecord::Wait(wait)) => Some(wait),
            _ => None,
        }
    }

    pub fn hook(&self, token: &str) -> Option<&HookState> {
        self.hooks.get(token)
    }

    /// Tokens of hooks that have not been disposed.
    pub fn live_hook_tokens(&self) -> Vec<String> {
        self.hooks
            .values()
            .filter(|hook| !hook.disposed)
            .map(|hook| hook.token.clone())
            .collect()
    }
}
