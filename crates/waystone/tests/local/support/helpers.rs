use std::future::Future;
use std::time::Duration;

use anyhow::{Result, anyhow};
use waystone::{
    LocalWorld, RetryPolicy, RunHandle, RunStatus, RuntimeConfig, StoredEvent, WorkflowBuilder,
    WorkflowEngine, WorkflowRuntime, WorkflowServiceConfig,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const TEST_MAX_ATTEMPTS: u32 = 3;

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("waystone=debug")
        .with_test_writer()
        .try_init();
}

/// Fast runtime config for tests.
pub fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        poll_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(5),
        retry_policy: RetryPolicy {
            max_attempts: TEST_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        worker_id: Some("test-worker".to_string()),
        ..Default::default()
    }
}

pub fn test_service_config() -> WorkflowServiceConfig {
    WorkflowServiceConfig {
        run_poll_interval: DEFAULT_POLL_INTERVAL,
    }
}

/// Builder over `world` with test configuration.
pub fn builder(world: &LocalWorld) -> WorkflowBuilder<LocalWorld> {
    WorkflowRuntime::builder(world.clone(), test_service_config()).config(test_runtime_config())
}

/// Poll until condition returns Some(T) or timeout expires.
pub async fn wait_until<F, Fut, T>(timeout: Duration, interval: Duration, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(result) = check().await? {
            return Ok(result);
        }

        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("timeout waiting for condition"));
        }

        tokio::time::sleep(interval).await;
    }
}

/// Drain the queues with `tick` until the run reaches a terminal status.
pub async fn drive<O>(
    engine: &WorkflowEngine<LocalWorld>,
    handle: &RunHandle<LocalWorld, O>,
) -> Result<RunStatus> {
    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        engine.runtime.tick().await?;
        let status = handle.status().await?;
        Ok(status.is_terminal().then_some(status))
    })
    .await
}

/// Event type names of a run log, in order.
pub fn event_types(events: &[StoredEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event.type_name()).collect()
}
