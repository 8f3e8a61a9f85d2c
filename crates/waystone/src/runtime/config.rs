//! Runtime configuration.

use std::time::Duration;

use crate::step::RetryPolicy;

/// Configuration for the workflow and step workers.
///
/// Controls polling, visibility timeouts, retry behavior and worker
/// concurrency.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use waystone::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     poll_interval: Duration::from_millis(20),
///     step_workers: 4, // Run up to 4 steps in parallel
///     ..Default::default()
/// };
/// assert_eq!(config.workflow_workers, 1);
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How often an idle worker polls the queue.
    ///
    /// Lower values reduce latency but increase backend load.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// How long a claimed message stays invisible to other workers.
    ///
    /// Should be longer than the longest expected step execution. If a
    /// worker crashes, the message is redelivered after this duration.
    /// Default: 5 minutes.
    pub visibility_timeout: Duration,

    /// Maximum time to wait for in-flight messages during shutdown.
    ///
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,

    /// Retry policy for steps that do not declare their own.
    pub retry_policy: RetryPolicy,

    /// Deliveries after which a message whose handler keeps failing is
    /// dead-lettered.
    ///
    /// Step retries and sleep reschedules are not handler failures and do
    /// not count towards this limit. Default: 10.
    pub max_delivery_attempts: u32,

    /// Worker identifier recorded on claimed messages.
    ///
    /// If `None`, a UUID is generated when the runtime is built.
    pub worker_id: Option<String>,

    /// Number of workers consuming workflow queues. Default: 1.
    pub workflow_workers: usize,

    /// Number of workers consuming step queues.
    ///
    /// Increase this when steps are slow (e.g. calling external APIs).
    /// Default: 1.
    pub step_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            visibility_timeout: Duration::from_secs(300), // 5 minutes
            shutdown_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            max_delivery_attempts: 10,
            worker_id: None,
            workflow_workers: 1,
            step_workers: 1,
        }
    }
}
