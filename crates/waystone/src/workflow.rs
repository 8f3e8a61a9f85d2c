//! Workflow functions and the context they run against.
//!
//! A workflow body is ordinary async Rust. Every durable operation it issues
//! through [`WorkflowContext`] (step call, hook, sleep) takes the next call
//! sequence number and is answered from the run's replay log:
//!
//! - recorded result: the returned future is immediately ready
//! - no result yet: the future stays pending, which suspends the run
//!
//! The engine polls the body exactly once per turn, so a pending future is
//! never woken. New operations are collected as commands and persisted when
//! the turn ends.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::OffsetDateTime;

use crate::closure::ClosureVars;
use crate::error::{Error, Result};
use crate::event::{CallRecord, RunState, StepOutcome};
use crate::hook::{Hook, HookDefinition, HookOptions};
use crate::id::{FunctionId, FunctionKind, RunId};
use crate::step::StepFunction;

/// A durable workflow.
///
/// The body must be deterministic: given the same replay log it must issue
/// the same durable operations in the same order. Side effects belong in
/// steps.
///
/// # Example
///
/// ```ignore
/// struct Checkout;
///
/// #[async_trait]
/// impl WorkflowFunction for Checkout {
///     const ID: &'static str = "workflow//orders.js//checkout";
///     type Input = Order;
///     type Output = Receipt;
///
///     async fn run(&self, ctx: &WorkflowContext, order: Order) -> Result<Receipt> {
///         let reservation = ctx.step::<ReserveStock>(&order).await?;
///         let closure = ClosureVars::new().with("count", &order.quantity)?;
///         ctx.step_with::<ChargeCard>(&reservation, closure).await
///     }
/// }
/// ```
#[async_trait]
pub trait WorkflowFunction: Send + Sync + 'static {
    /// Identifier in `workflow//<source>//<path>` form.
    const ID: &'static str;

    type Input: Serialize + DeserializeOwned + Send + Sync;

    type Output: Serialize + DeserializeOwned + Send;

    async fn run(&self, ctx: &WorkflowContext, input: Self::Input) -> Result<Self::Output>;
}

/// Type-erased workflow for dynamic dispatch from the registry.
#[async_trait]
pub(crate) trait WorkflowEntry: Send + Sync {
    async fn run(&self, ctx: &WorkflowContext, input: Value) -> Result<Value>;
}

pub(crate) struct TypedWorkflow<F>(pub(crate) F);

#[async_trait]
impl<F: WorkflowFunction> WorkflowEntry for TypedWorkflow<F> {
    async fn run(&self, ctx: &WorkflowContext, input: Value) -> Result<Value> {
        let input: F::Input = serde_json::from_value(input)?;
        let output = self.0.run(ctx, input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// A durable operation issued during the current turn.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    ScheduleStep {
        seq: u32,
        step_id: FunctionId,
        input: Value,
        closure: ClosureVars,
    },
    CreateHook {
        seq: u32,
        token: String,
        schema: Value,
        metadata: Value,
    },
    DisposeHook {
        token: String,
    },
    Sleep {
        seq: u32,
        resume_at: OffsetDateTime,
    },
}

/// Mutable bookkeeping for one turn.
#[derive(Debug, Default)]
pub(crate) struct Turn {
    next_seq: u32,
    pub(crate) commands: Vec<Command>,
    pub(crate) divergence: Option<(u32, String)>,
}

impl Turn {
    fn allocate(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn diverge(&mut self, seq: u32, message: String) -> Error {
        if self.divergence.is_none() {
            self.divergence = Some((seq, message.clone()));
        }
        Error::ReplayDivergence { seq, message }
    }
}

pub(crate) fn lock_turn(turn: &Mutex<Turn>) -> MutexGuard<'_, Turn> {
    turn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Future for a durable operation.
///
/// Ready when the replay log holds the operation's result; pending otherwise.
/// A pending `Durable` never completes within the current turn.
#[must_use = "durable operations do nothing unless awaited"]
#[derive(Debug)]
pub struct Durable<T> {
    value: Option<T>,
}

impl<T> Durable<T> {
    fn ready(value: T) -> Self {
        Self { value: Some(value) }
    }

    fn pending() -> Self {
        Self { value: None }
    }
}

impl<T> Unpin for Durable<T> {}

impl<T> Future for Durable<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        match self.value.take() {
            Some(value) => Poll::Ready(value),
            None => Poll::Pending,
        }
    }
}

/// Result of a step call.
pub type StepFuture<T> = Durable<Result<T>>;

/// Context passed to a workflow body for one turn.
pub struct WorkflowContext {
    run_id: RunId,
    workflow_id: FunctionId,
    state: Arc<RunState>,
    turn: Arc<Mutex<Turn>>,
}

impl WorkflowContext {
    pub(crate) fn new(run_id: RunId, workflow_id: FunctionId, state: Arc<RunState>) -> Self {
        Self {
            run_id,
            workflow_id,
            state,
            turn: Arc::new(Mutex::new(Turn::default())),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn workflow_id(&self) -> &FunctionId {
        &self.workflow_id
    }

    /// Call a typed step.
    pub fn step<S: StepFunction>(&self, input: &S::Input) -> StepFuture<S::Output> {
        self.step_with::<S>(input, ClosureVars::new())
    }

    /// Call a typed step, passing the values it captures from this scope.
    pub fn step_with<S: StepFunction>(
        &self,
        input: &S::Input,
        closure: ClosureVars,
    ) -> StepFuture<S::Output> {
        let step_id = match S::ID.parse::<FunctionId>() {
            Ok(id) => id,
            Err(err) => return Durable::ready(Err(err)),
        };
        let input = match serde_json::to_value(input) {
            Ok(input) => input,
            Err(err) => return Durable::ready(Err(err.into())),
        };
        self.invoke_with_closure(&step_id, input, closure)
    }

    /// Call a step by identifier with a JSON input.
    pub fn invoke<T: DeserializeOwned>(&self, step_id: &FunctionId, input: Value) -> StepFuture<T> {
        self.invoke_with_closure(step_id, input, ClosureVars::new())
    }

    /// Call a step by identifier with a JSON input and captured closure values.
    ///
    /// The call sequence number is assigned synchronously, so concurrent
    /// calls issued before awaiting (e.g. with `futures::join!`) are numbered
    /// in call order.
    pub fn invoke_with_closure<T: DeserializeOwned>(
        &self,
        step_id: &FunctionId,
        input: Value,
        closure: ClosureVars,
    ) -> StepFuture<T> {
        if step_id.kind() != FunctionKind::Step {
            return Durable::ready(Err(Error::InvalidInvocation(format!(
                "{step_id} is not a step"
            ))));
        }

        let mut turn = lock_turn(&self.turn);
        let seq = turn.allocate();
        match self.state.calls.get(&seq) {
            Some(CallRecord::Step(record)) if record.step_id != step_id.as_str() => {
                Durable::ready(Err(turn.diverge(
                    seq,
                    format!("log has step {} but workflow called {step_id}", record.step_id),
                )))
            }
            Some(CallRecord::Step(record)) => match &record.outcome {
                StepOutcome::Completed(output) => {
                    Durable::ready(serde_json::from_value(output.clone()).map_err(Error::from))
                }
                StepOutcome::Failed(failure) => Durable::ready(Err(Error::StepFailed {
                    step_id: record.step_id.clone(),
                    seq,
                    message: failure.message.clone(),
                })),
                StepOutcome::Pending => Durable::pending(),
            },
            Some(other) => Durable::ready(Err(turn.diverge(
                seq,
                format!("log has {} but workflow called step {step_id}", other.kind_name()),
            ))),
            None => {
                turn.commands.push(Command::ScheduleStep {
                    seq,
                    step_id: step_id.clone(),
                    input,
                    closure,
                });
                Durable::pending()
            }
        }
    }

    /// Register a hook and return a stream of its events.
    pub fn create_hook<T>(
        &self,
        definition: &HookDefinition<T>,
        options: HookOptions,
    ) -> Result<Hook<T>> {
        let mut turn = lock_turn(&self.turn);
        let seq = turn.allocate();
        match self.state.calls.get(&seq) {
            Some(CallRecord::Hook { token }) => {
                let (events, disposed) = self
                    .state
                    .hook(token)
                    .map(|hook| (hook.events.clone(), hook.disposed))
                    .unwrap_or_default();
                drop(turn);
                Ok(Hook::new(
                    token.clone(),
                    events,
                    disposed,
                    Arc::clone(&self.turn),
                ))
            }
            Some(other) => Err(turn.diverge(
                seq,
                format!("log has {} but workflow created a hook", other.kind_name()),
            )),
            None => {
                let token = options
                    .token
                    .unwrap_or_else(|| format!("hook_{}_{seq}", self.run_id));
                turn.commands.push(Command::CreateHook {
                    seq,
                    token: token.clone(),
                    schema: definition.schema().clone(),
                    metadata: options.metadata,
                });
                drop(turn);
                Ok(Hook::new(token, Vec::new(), false, Arc::clone(&self.turn)))
            }
        }
    }

    /// Suspend the run for at least `duration`.
    pub fn sleep(&self, duration: Duration) -> Durable<Result<()>> {
        let mut turn = lock_turn(&self.turn);
        let seq = turn.allocate();
        match self.state.calls.get(&seq) {
            Some(CallRecord::Wait(wait)) if wait.completed => Durable::ready(Ok(())),
            Some(CallRecord::Wait(_)) => Durable::pending(),
            Some(other) => Durable::ready(Err(turn.diverge(
                seq,
                format!("log has {} but workflow called sleep", other.kind_name()),
            ))),
            None => {
                turn.commands.push(Command::Sleep {
                    seq,
                    resume_at: OffsetDateTime::now_utc() + duration,
                });
                Durable::pending()
            }
        }
    }

    /// Take the commands collected during the turn.
    pub(crate) fn finish_turn(&self) -> Turn {
        std::mem::take(&mut *lock_turn(&self.turn))
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("run_id", &self.run_id)
            .field("workflow_id", &self.workflow_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::event::RunEvent;

    fn context(events: Vec<RunEvent>) -> WorkflowContext {
        WorkflowContext::new(
            RunId::new("run-1"),
            FunctionId::workflow("a.js", "w").unwrap(),
            Arc::new(RunState::replay(events)),
        )
    }

    fn step_id(name: &str) -> FunctionId {
        FunctionId::step("a.js", name).unwrap()
    }

    #[test]
    fn unrecorded_call_is_pending_and_scheduled() {
        let ctx = context(vec![]);

        let result = ctx.invoke::<i64>(&step_id("add"), json!([1, 2])).now_or_never();

        assert!(result.is_none());
        let turn = ctx.finish_turn();
        assert_eq!(
            turn.commands,
            vec![Command::ScheduleStep {
                seq: 0,
                step_id: step_id("add"),
                input: json!([1, 2]),
                closure: ClosureVars::new(),
            }]
        );
    }

    #[test]
    fn recorded_result_is_returned_without_scheduling() {
        let ctx = context(vec![
            RunEvent::StepScheduled {
                seq: 0,
                step_id: step_id("add").to_string(),
                input: json!([1, 2]),
                closure: ClosureVars::new(),
            },
            RunEvent::StepCompleted {
                seq: 0,
                output: json!(3),
            },
        ]);

        let result = ctx
            .invoke::<i64>(&step_id("add"), json!([1, 2]))
            .now_or_never()
            .unwrap()
            .unwrap();

        assert_eq!(result, 3);
        assert!(ctx.finish_turn().commands.is_empty());
    }

    #[test]
    fn sequence_numbers_follow_call_order() {
        let ctx = context(vec![]);

        let _a = ctx.invoke::<i64>(&step_id("a"), json!(null));
        let _b = ctx.invoke::<i64>(&step_id("b"), json!(null));
        let _c = ctx.sleep(Duration::from_secs(1));

        let seqs: Vec<u32> = ctx
            .finish_turn()
            .commands
            .iter()
            .map(|command| match command {
                Command::ScheduleStep { seq, .. } | Command::Sleep { seq, .. } => *seq,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn mismatched_step_is_a_divergence() {
        let ctx = context(vec![RunEvent::StepScheduled {
            seq: 0,
            step_id: step_id("a").to_string(),
            input: json!(null),
            closure: ClosureVars::new(),
        }]);

        let result = ctx
            .invoke::<i64>(&step_id("b"), json!(null))
            .now_or_never()
            .unwrap();

        assert!(matches!(result, Err(Error::ReplayDivergence { seq: 0, .. })));
        assert!(ctx.finish_turn().divergence.is_some());
    }

    #[test]
    fn failed_step_surfaces_at_call_site() {
        let ctx = context(vec![
            RunEvent::StepScheduled {
                seq: 0,
                step_id: step_id("charge").to_string(),
                input: json!(null),
                closure: ClosureVars::new(),
            },
            RunEvent::StepFailed {
                seq: 0,
                error: crate::FailureInfo::new(crate::FailureKind::Fatal, "card declined"),
            },
        ]);

        let err = ctx
            .invoke::<i64>(&step_id("charge"), json!(null))
            .now_or_never()
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, Error::StepFailed { seq: 0, message, .. } if message == "card declined"));
    }
}
