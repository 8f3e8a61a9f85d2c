//! Function registry and runtime builder.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use super::config::RuntimeConfig;
use super::queue_worker::QueueWorker;
use super::router::QueueRouter;
use super::step_worker::StepHandler;
use super::workflow_worker::WorkflowHandler;
use crate::engine::WorkflowEngine;
use crate::error::{Error, Result};
use crate::id::{FunctionId, FunctionKind, STEP_QUEUE_PREFIX, WORKFLOW_QUEUE_PREFIX};
use crate::manifest::Manifest;
use crate::service::{WorkflowService, WorkflowServiceConfig};
use crate::step::{FnStep, StepContext, StepEntry, StepError, StepFunction, TypedStep};
use crate::workflow::{TypedWorkflow, WorkflowEntry, WorkflowFunction};
use crate::world::{DeadLetter, MessageId, World};

/// Write-once map from identifier to registered workflows and steps.
///
/// Filled by [`WorkflowBuilder`] and frozen behind an `Arc` when the runtime
/// is built, so lookups need no locking.
#[derive(Default)]
pub(crate) struct Registry {
    workflows: HashMap<String, (FunctionId, Box<dyn WorkflowEntry>)>,
    steps: HashMap<String, (FunctionId, Box<dyn StepEntry>)>,
}

impl Registry {
    fn register_workflow(&mut self, id: FunctionId, entry: Box<dyn WorkflowEntry>) -> Result<()> {
        if id.kind() != FunctionKind::Workflow {
            return Err(Error::InvalidIdentifier(format!(
                "{id} registered as a workflow"
            )));
        }
        if self.workflows.contains_key(id.as_str()) {
            return Err(Error::DuplicateRegistration(id.to_string()));
        }
        self.workflows.insert(id.to_string(), (id, entry));
        Ok(())
    }

    fn register_step(&mut self, id: FunctionId, entry: Box<dyn StepEntry>) -> Result<()> {
        if id.kind() != FunctionKind::Step {
            return Err(Error::InvalidIdentifier(format!("{id} registered as a step")));
        }
        if self.steps.contains_key(id.as_str()) {
            return Err(Error::DuplicateRegistration(id.to_string()));
        }
        self.steps.insert(id.to_string(), (id, entry));
        Ok(())
    }

    /// Look up a workflow by its rendered identifier.
    pub(crate) fn workflow(&self, id: &str) -> Option<(&FunctionId, &dyn WorkflowEntry)> {
        self.workflows
            .get(id)
            .map(|(id, entry)| (id, entry.as_ref()))
    }

    /// Look up a step by its rendered identifier.
    pub(crate) fn step(&self, id: &str) -> Option<(&FunctionId, &dyn StepEntry)> {
        self.steps.get(id).map(|(id, entry)| (id, entry.as_ref()))
    }

    fn contains(&self, id: &str) -> bool {
        self.workflows.contains_key(id) || self.steps.contains_key(id)
    }

    pub(crate) fn workflow_count(&self) -> usize {
        self.workflows.len()
    }

    pub(crate) fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Builder for constructing a [`WorkflowRuntime`].
///
/// Registration errors (malformed or duplicate identifiers) are deferred
/// until build time.
///
/// # Example
///
/// ```ignore
/// let engine = WorkflowRuntime::builder(world, WorkflowServiceConfig::default())
///     .workflow(Checkout)
///     .step(ReserveStock)
///     .step(ChargeCard { payments })
///     .config(RuntimeConfig {
///         poll_interval: Duration::from_millis(50),
///         ..Default::default()
///     })
///     .build_engine()?;
/// ```
pub struct WorkflowBuilder<W: World> {
    world: W,
    registry: Registry,
    deferred_error: Option<Error>,
    config: RuntimeConfig,
    service_config: WorkflowServiceConfig,
}

impl<W: World> WorkflowBuilder<W> {
    fn new(world: W, service_config: WorkflowServiceConfig) -> Self {
        Self {
            world,
            registry: Registry::default(),
            deferred_error: None,
            config: RuntimeConfig::default(),
            service_config,
        }
    }

    /// Register a workflow under its `ID`.
    pub fn workflow<F: WorkflowFunction>(mut self, workflow: F) -> Self {
        let result = F::ID.parse::<FunctionId>().and_then(|id| {
            self.registry
                .register_workflow(id, Box::new(TypedWorkflow(workflow)))
        });
        self.defer(result)
    }

    /// Register a step under its `ID`.
    pub fn step<S: StepFunction>(mut self, step: S) -> Self {
        let result = S::ID
            .parse::<FunctionId>()
            .and_then(|id| self.registry.register_step(id, Box::new(TypedStep(step))));
        self.defer(result)
    }

    /// Register a closure-backed step under `id`.
    pub fn step_fn<F, Fut>(mut self, id: &str, step: FnStep<F, Fut>) -> Self
    where
        F: Fn(Value, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, StepError>> + Send + 'static,
    {
        let result = id
            .parse::<FunctionId>()
            .and_then(|id| self.registry.register_step(id, Box::new(step)));
        self.defer(result)
    }

    fn defer(mut self, result: Result<()>) -> Self {
        if let Err(e) = result {
            if self.deferred_error.is_none() {
                self.deferred_error = Some(e);
            }
        }
        self
    }

    /// Set the runtime configuration.
    ///
    /// If not called, uses [`RuntimeConfig::default()`].
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Check that every workflow and step in `manifest` is registered.
    pub fn verify_manifest(&self, manifest: &Manifest) -> Result<()> {
        let missing: Vec<&str> = manifest
            .ids()
            .filter(|id| !self.registry.contains(id))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInvocation(format!(
                "not registered: {}",
                missing.join(", ")
            )))
        }
    }

    /// Build the workflow engine (service + runtime).
    pub fn build_engine(self) -> Result<WorkflowEngine<W>> {
        let runtime = self.build_runtime()?;
        Ok(WorkflowEngine {
            service: Arc::clone(&runtime.service),
            runtime,
        })
    }

    /// Build the runtime.
    pub fn build_runtime(self) -> Result<WorkflowRuntime<W>> {
        if let Some(e) = self.deferred_error {
            return Err(e);
        }
        let worker_id = self
            .config
            .worker_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        let registry = Arc::new(self.registry);
        let service = Arc::new(WorkflowService::new(
            self.world.clone(),
            Arc::clone(&registry),
            self.service_config,
        ));

        let mut router = QueueRouter::new();
        router.register_handler(
            WORKFLOW_QUEUE_PREFIX,
            Arc::new(WorkflowHandler::new(self.world.clone(), Arc::clone(&registry))),
        )?;
        router.register_handler(
            STEP_QUEUE_PREFIX,
            Arc::new(StepHandler::new(
                self.world.clone(),
                Arc::clone(&registry),
                self.config.retry_policy.clone(),
            )),
        )?;

        Ok(WorkflowRuntime {
            world: self.world,
            service,
            router: Arc::new(router),
            config: self.config,
            worker_id,
        })
    }

    /// Build the workflow service without starting workers.
    pub fn build_service(self) -> Result<WorkflowService<W>> {
        if let Some(e) = self.deferred_error {
            return Err(e);
        }
        Ok(WorkflowService::new(
            self.world,
            Arc::new(self.registry),
            self.service_config,
        ))
    }
}

/// Worker runtime: consumes workflow and step queues.
///
/// # Lifecycle
///
/// 1. Create with [`WorkflowRuntime::builder`]
/// 2. Register workflows and steps on the [`WorkflowBuilder`]
/// 3. Build with [`WorkflowBuilder::build_runtime`] or [`WorkflowBuilder::build_engine`]
/// 4. Run with [`WorkflowRuntime::run`], or drive it with [`WorkflowRuntime::tick`]
#[derive(Clone)]
pub struct WorkflowRuntime<W: World> {
    world: W,
    service: Arc<WorkflowService<W>>,
    router: Arc<QueueRouter>,
    config: RuntimeConfig,
    worker_id: String,
}

impl<W: World> WorkflowRuntime<W> {
    /// Create a new runtime builder.
    pub fn builder(world: W, service_config: WorkflowServiceConfig) -> WorkflowBuilder<W> {
        WorkflowBuilder::new(world, service_config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn workflow_count(&self) -> usize {
        self.service.registry().workflow_count()
    }

    pub fn step_count(&self) -> usize {
        self.service.registry().step_count()
    }

    pub fn service(&self) -> &Arc<WorkflowService<W>> {
        &self.service
    }

    /// Run workflow and step workers until `shutdown` completes.
    ///
    /// The number of workers is controlled by `workflow_workers` and
    /// `step_workers` in [`RuntimeConfig`]. Workers coordinate through queue
    /// visibility timeouts, so several processes may share one world.
    ///
    /// # Shutdown Behavior
    ///
    /// When the shutdown future completes:
    /// 1. All workers stop claiming new messages
    /// 2. In-flight messages are finished, up to `shutdown_timeout`
    /// 3. Unfinished messages are redelivered after their visibility timeout
    ///
    /// # Example
    ///
    /// ```ignore
    /// runtime.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
    /// ```
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workflow_worker_count = self.config.workflow_workers.max(1);
        let step_worker_count = self.config.step_workers.max(1);

        info!(
            worker_id = %self.worker_id,
            workflows = self.workflow_count(),
            steps = self.step_count(),
            workflow_workers = workflow_worker_count,
            step_workers = step_worker_count,
            "Runtime starting"
        );

        let pools = [
            ("workflow", WORKFLOW_QUEUE_PREFIX, workflow_worker_count),
            ("step", STEP_QUEUE_PREFIX, step_worker_count),
        ];
        let mut worker_handles = Vec::new();
        for (role, prefix, count) in pools {
            for i in 0..count {
                let worker_id = if count == 1 {
                    format!("{}-{role}", self.worker_id)
                } else {
                    format!("{}-{role}-{i}", self.worker_id)
                };
                let worker = QueueWorker::new(
                    self.world.clone(),
                    Arc::clone(&self.router),
                    vec![prefix.to_string()],
                    self.config.clone(),
                    worker_id,
                );
                let worker_shutdown_rx = shutdown_rx.clone();
                worker_handles.push(tokio::spawn(async move {
                    worker.run(worker_shutdown_rx).await;
                }));
            }
        }

        shutdown.await;

        let _ = shutdown_tx.send(true);

        let shutdown_timeout = self.config.shutdown_timeout;
        let all_workers = async {
            for handle in worker_handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(shutdown_timeout, all_workers).await {
            Ok(()) => {
                info!(worker_id = %self.worker_id, "Runtime stopped gracefully");
            }
            Err(_) => {
                warn!(
                    worker_id = %self.worker_id,
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Shutdown timeout exceeded, forcing stop"
                );
            }
        }

        Ok(())
    }

    /// Process every message that is visible now, on the calling task.
    ///
    /// Returns the number of messages processed. Messages that become
    /// visible while draining (such as the turn following a step result)
    /// are processed too. Delayed messages are not waited for.
    pub async fn tick(&self) -> Result<usize> {
        let worker = self.inline_worker();
        let mut processed = 0;
        while worker.process_one().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Claim and process at most one visible message, on the calling task.
    ///
    /// Returns `false` when nothing was visible.
    pub async fn process_next(&self) -> Result<bool> {
        self.inline_worker().process_one().await
    }

    fn inline_worker(&self) -> QueueWorker<W> {
        QueueWorker::new(
            self.world.clone(),
            Arc::clone(&self.router),
            self.router.prefixes(),
            self.config.clone(),
            format!("{}-inline", self.worker_id),
        )
    }

    /// Fetch dead-lettered messages, oldest first.
    pub async fn fetch_dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>> {
        self.world.fetch_dead_letters(limit).await
    }

    /// Make a dead-lettered message deliverable again.
    ///
    /// Returns `Ok(false)` if no such dead letter exists.
    pub async fn retry_dead_letter(&self, id: MessageId) -> Result<bool> {
        self.world.retry_dead_letter(id).await
    }
}
