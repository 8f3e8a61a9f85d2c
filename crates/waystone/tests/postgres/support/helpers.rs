use std::time::Duration;

use anyhow::{Result, anyhow};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use waystone::{
    PgWorld, RetryPolicy, RunHandle, RunStatus, RuntimeConfig, WorkflowBuilder, WorkflowEngine,
    WorkflowRuntime, WorkflowService, WorkflowServiceConfig,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("waystone=debug")
        .with_test_writer()
        .try_init();
}

pub fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
        },
        step_workers: 2,
        ..Default::default()
    }
}

pub fn builder(pool: &PgPool) -> WorkflowBuilder<PgWorld> {
    WorkflowRuntime::builder(
        PgWorld::new(pool.clone()),
        WorkflowServiceConfig {
            run_poll_interval: DEFAULT_POLL_INTERVAL,
        },
    )
    .config(test_runtime_config())
}

/// A runtime spawned in the background. Drop signals shutdown.
pub struct TestApp {
    pub service: std::sync::Arc<WorkflowService<PgWorld>>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<waystone::Result<()>>>,
}

impl TestApp {
    pub fn spawn(engine: WorkflowEngine<PgWorld>) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let runtime = engine.runtime;
        let handle = tokio::spawn(async move {
            runtime
                .run(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        Self {
            service: engine.service,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await??;
        }
        Ok(())
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Wait for a run to reach a terminal status.
pub async fn wait_for_terminal<O>(handle: &RunHandle<PgWorld, O>) -> Result<RunStatus> {
    let deadline = tokio::time::Instant::now() + DEFAULT_TEST_TIMEOUT;
    loop {
        let status = handle.status().await?;
        if status.is_terminal() {
            return Ok(status);
        }
        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("run {} still {status}", handle.run_id()));
        }
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}
