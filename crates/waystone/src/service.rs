//! Workflow service: start, inspect, resume and cancel runs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::event::{RunEvent, RunState, RunStatus};
use crate::executor::wake_message;
use crate::hook::{HookDelivery, HookReceipt, validate_payload};
use crate::id::{FunctionId, FunctionKind, RunId};
use crate::run::RunHandle;
use crate::runtime::registry::Registry;
use crate::workflow::WorkflowFunction;
use crate::world::{BeginResult, NewRun, RunQuery, RunRecord, StoredEvent, UnitOfWork, World};

/// Configuration for the workflow service.
#[derive(Debug, Clone)]
pub struct WorkflowServiceConfig {
    /// How often a [`RunHandle`] polls the world while waiting for a result
    /// or for stream chunks. Default: 100ms.
    pub run_poll_interval: Duration,
}

impl Default for WorkflowServiceConfig {
    fn default() -> Self {
        Self {
            run_poll_interval: Duration::from_millis(100),
        }
    }
}

/// App-facing entrypoint for runs.
///
/// The service only writes to the world; turns are executed by the workers
/// of a [`WorkflowRuntime`](crate::WorkflowRuntime) sharing the same world.
pub struct WorkflowService<W: World> {
    world: W,
    registry: Arc<Registry>,
    config: WorkflowServiceConfig,
}

impl<W: World> WorkflowService<W> {
    pub(crate) fn new(world: W, registry: Arc<Registry>, config: WorkflowServiceConfig) -> Self {
        Self {
            world,
            registry,
            config,
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &WorkflowServiceConfig {
        &self.config
    }

    /// Start a typed workflow.
    ///
    /// Fails with [`Error::InvalidInvocation`] if the workflow is not registered.
    pub async fn start<F: WorkflowFunction>(
        &self,
        input: &F::Input,
    ) -> Result<RunHandle<W, F::Output>> {
        let run_id = self.create(F::ID, serde_json::to_value(input)?).await?;
        Ok(self.handle(run_id))
    }

    /// Start a workflow by identifier with a JSON input.
    pub async fn start_dynamic(&self, workflow_id: &str, input: Value) -> Result<RunHandle<W>> {
        let run_id = self.create(workflow_id, input).await?;
        Ok(self.handle(run_id))
    }

    async fn create(&self, workflow_id: &str, input: Value) -> Result<RunId> {
        let Some((id, _)) = self.registry.workflow(workflow_id) else {
            let reason = match workflow_id.parse::<FunctionId>() {
                Ok(id) if id.kind() == FunctionKind::Step => {
                    format!("{workflow_id} is a step, not a workflow")
                }
                _ => format!("workflow {workflow_id} is not registered"),
            };
            return Err(Error::InvalidInvocation(reason));
        };

        let run_id = RunId::generate();
        let message = wake_message(id.as_str(), &run_id, None)?
            .idempotency_key(format!("{run_id}:start"));
        self.world
            .create_run(
                NewRun {
                    run_id: run_id.clone(),
                    workflow_id: id.clone(),
                    input,
                },
                message,
            )
            .await?;

        info!(run_id = %run_id, workflow_id = %id, "Run started");
        Ok(run_id)
    }

    /// Handle to an existing run.
    ///
    /// Fails with [`Error::RunNotFound`] for unknown runs.
    pub async fn get_run(&self, run_id: &RunId) -> Result<RunHandle<W>> {
        if self.world.get_run(run_id).await?.is_none() {
            return Err(Error::RunNotFound(run_id.clone()));
        }
        Ok(self.handle(run_id.clone()))
    }

    fn handle<O>(&self, run_id: RunId) -> RunHandle<W, O> {
        RunHandle::new(self.world.clone(), run_id, self.config.run_poll_interval)
    }

    /// Deliver an external event to the hook registered under `token`.
    ///
    /// The payload is validated against the hook's schema. A payload that
    /// does not match is rejected with [`Error::HookValidation`] and nothing
    /// is recorded; the hook stays open for further deliveries.
    pub async fn resume_hook(&self, token: &str, delivery: HookDelivery) -> Result<HookReceipt> {
        let hook = self
            .world
            .find_hook(token)
            .await?
            .ok_or_else(|| Error::HookNotFound(token.to_string()))?;

        validate_payload(&hook.schema, &delivery.payload).map_err(|errors| {
            Error::HookValidation {
                token: token.to_string(),
                errors,
            }
        })?;

        let (run, events, mut uow) = match self.world.begin(&hook.run_id).await? {
            BeginResult::Active { run, events, uow } => (run, events, uow),
            BeginResult::Finished(run) => {
                return Err(Error::RunFinished {
                    run_id: run.run_id,
                    status: run.status,
                });
            }
        };

        let state = RunState::replay(events);
        let hook_state = state
            .hook(token)
            .filter(|hook| !hook.disposed)
            .ok_or_else(|| Error::HookNotFound(token.to_string()))?;
        if hook_state.is_closed() {
            return Err(Error::HookClosed(token.to_string()));
        }
        let index = hook_state.events.len();

        uow.append_events(vec![RunEvent::HookReceived {
            token: token.to_string(),
            payload: delivery.payload,
            terminal: delivery.terminal,
        }])
        .await?;
        uow.enqueue(
            wake_message(&run.workflow_id, &run.run_id, None)?
                .idempotency_key(format!("{}:hook:{token}:{index}", run.run_id)),
        )
        .await?;
        uow.set_status(RunStatus::Running);
        uow.commit().await?;

        debug!(run_id = %run.run_id, token = %token, index, "Hook event recorded");
        Ok(HookReceipt {
            run_id: run.run_id,
            index,
        })
    }

    /// Cancel a run.
    ///
    /// Its hooks are released and later step results are ignored. Fails with
    /// [`Error::RunFinished`] if the run is already terminal.
    pub async fn cancel(&self, run_id: &RunId) -> Result<()> {
        let (events, mut uow) = match self.world.begin(run_id).await? {
            BeginResult::Active { events, uow, .. } => (events, uow),
            BeginResult::Finished(run) => {
                return Err(Error::RunFinished {
                    run_id: run.run_id,
                    status: run.status,
                });
            }
        };

        let live = RunState::replay(events).live_hook_tokens();
        let mut cancelled: Vec<RunEvent> = live
            .iter()
            .map(|token| RunEvent::HookDisposed {
                token: token.clone(),
            })
            .collect();
        cancelled.push(RunEvent::RunCancelled);

        if !live.is_empty() {
            uow.dispose_hooks(live).await?;
        }
        uow.append_events(cancelled).await?;
        uow.set_status(RunStatus::Cancelled);
        uow.commit().await?;

        info!(run_id = %run_id, "Run cancelled");
        Ok(())
    }

    /// List runs, newest first.
    pub async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        self.world.list_runs(query).await
    }

    /// The full event log of a run.
    pub async fn run_events(&self, run_id: &RunId) -> Result<Vec<StoredEvent>> {
        self.world.fetch_run_events(run_id).await
    }

    pub fn workflow_count(&self) -> usize {
        self.registry.workflow_count()
    }
}
