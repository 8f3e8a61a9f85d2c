//! Durable execution of step and workflow functions.
//!
//! Waystone runs ordinary async functions *durably*: a workflow survives
//! process restarts and can suspend for hours waiting on external events.
//!
//! - **Steps** ([`StepFunction`]) are retryable units of side-effecting work,
//!   delivered at least once through a queue and recorded at most once
//! - **Workflows** ([`WorkflowFunction`]) are deterministic orchestrators,
//!   re-run from the top on every turn and answered from the run's replay log
//! - **Hooks** ([`Hook`]) are wait-points resumed by external callers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         workflow turn                                │
//! │                                                                      │
//! │   1. Claim message on __wkf_workflow_<id>                            │
//! │   2. Begin unit of work (locks the run, loads its log)               │
//! │   3. Replay log → RunState                                           │
//! │   4. Poll the workflow body once                                     │
//! │        recorded call  → result returned at the call site             │
//! │        new call       → command collected, body suspends             │
//! │   5. Append events, enqueue step jobs / wakes (outbox), commit       │
//! └──────────────────────────────────────────────────────────────────────┘
//!                    │ __wkf_step_<id>              ▲ wake
//!                    ▼                              │
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │   step job: run the step, record StepCompleted / StepFailed /        │
//! │   StepRetrying under the run lock, wake the workflow                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use waystone::{
//!     LocalWorld, StepContext, StepError, StepFunction, WorkflowContext,
//!     WorkflowFunction, WorkflowRuntime, WorkflowServiceConfig, async_trait,
//! };
//!
//! struct Add;
//!
//! #[async_trait]
//! impl StepFunction for Add {
//!     const ID: &'static str = "step//math.js//add";
//!     type Input = (i64, i64);
//!     type Output = i64;
//!
//!     async fn run(&self, (a, b): (i64, i64), _ctx: &StepContext) -> Result<i64, StepError> {
//!         Ok(a + b)
//!     }
//! }
//!
//! struct Sum;
//!
//! #[async_trait]
//! impl WorkflowFunction for Sum {
//!     const ID: &'static str = "workflow//math.js//sum";
//!     type Input = Vec<i64>;
//!     type Output = i64;
//!
//!     async fn run(&self, ctx: &WorkflowContext, values: Vec<i64>) -> waystone::Result<i64> {
//!         let mut total = 0;
//!         for value in values {
//!             total = ctx.step::<Add>(&(total, value)).await?;
//!         }
//!         Ok(total)
//!     }
//! }
//!
//! let engine = WorkflowRuntime::builder(LocalWorld::new(), WorkflowServiceConfig::default())
//!     .workflow(Sum)
//!     .step(Add)
//!     .build_engine()?;
//!
//! let handle = engine.service.start::<Sum>(&vec![1, 2, 3]).await?;
//! tokio::spawn(engine.runtime.run(shutdown));
//! assert_eq!(handle.return_value().await?, 6);
//! ```
//!
//! # Feature Flags
//!
//! - `postgres` — Enables [`PgWorld`] for production use with PostgreSQL

mod closure;
mod engine;
mod error;
mod event;
mod executor;
mod hook;
mod id;
mod manifest;
mod run;
pub mod runtime;
mod service;
mod step;
mod workflow;
pub mod world;

pub use async_trait::async_trait;
pub use closure::ClosureVars;
pub use engine::WorkflowEngine;
pub use error::{Error, Result};
pub use event::{
    CallRecord, FailureInfo, FailureKind, HookEventRecord, HookState, RunEvent, RunState,
    RunStatus, StepOutcome, StepRecord, WaitState,
};
pub use hook::{Hook, HookDefinition, HookDelivery, HookEvent, HookOptions, HookReceipt};
pub use id::{FunctionId, FunctionKind, RunId, STEP_QUEUE_PREFIX, WORKFLOW_QUEUE_PREFIX};
pub use manifest::{MANIFEST_MARKER, Manifest, ManifestStep, ManifestWorkflow};
pub use nonempty::NonEmpty;
pub use run::RunHandle;
pub use runtime::{
    HandlerResponse, MessageMeta, QueueHandler, QueueRouter, RuntimeConfig, WorkflowBuilder,
    WorkflowRuntime,
};
pub use service::{WorkflowService, WorkflowServiceConfig};
pub use step::{FnStep, RetryPolicy, StepContext, StepError, StepFunction, step_fn};
pub use workflow::{Durable, StepFuture, WorkflowContext, WorkflowFunction};
#[cfg(feature = "postgres")]
pub use world::PgWorld;
pub use world::{
    BeginResult, DeadLetter, EnqueueOptions, HookRecord, LocalWorld, LocalWorldConfig, MessageId,
    NewRun, OutgoingMessage, Queue, QueueMessage, Rescheduled, RunQuery, RunQueryStore,
    RunRecord, Store, StoredEvent, StreamChunk, StreamStore, UnitOfWork, World,
};
