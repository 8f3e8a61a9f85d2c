//! Worker loop that claims queue messages and dispatches them to handlers.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::RuntimeConfig;
use super::router::{MessageMeta, QueueRouter};
use crate::world::{Queue, QueueMessage};

/// Worker that polls the queue for messages under a set of prefixes.
///
/// # Lifecycle
///
/// 1. Poll for a visible message at `poll_interval`
/// 2. Claim it (hidden for `visibility_timeout`)
/// 3. Route it to the handler registered for its queue prefix
/// 4. Acknowledge, reschedule on request, or reschedule with backoff on error
/// 5. Dead-letter messages whose handler keeps failing
/// 6. Repeat until shutdown signal
pub(crate) struct QueueWorker<Q: Queue> {
    queue: Q,
    router: Arc<QueueRouter>,
    prefixes: Vec<String>,
    config: RuntimeConfig,
    worker_id: String,
}

impl<Q: Queue> QueueWorker<Q> {
    pub fn new(
        queue: Q,
        router: Arc<QueueRouter>,
        prefixes: Vec<String>,
        config: RuntimeConfig,
        worker_id: String,
    ) -> Self {
        Self {
            queue,
            router,
            prefixes,
            config,
            worker_id,
        }
    }

    /// Run until the shutdown receiver signals.
    ///
    /// A worker drains every visible message before waiting for the next
    /// tick, and finishes the message in hand before exiting.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(worker_id = %self.worker_id, prefixes = ?self.prefixes, "Queue worker started");

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    loop {
                        match self.process_one().await {
                            Ok(true) if !*shutdown.borrow() => continue,
                            Ok(_) => break,
                            Err(e) => {
                                error!(worker_id = %self.worker_id, error = %e, "Error processing message");
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id = %self.worker_id, "Queue worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and process one message.
    ///
    /// Returns `Ok(false)` when no message was visible.
    pub async fn process_one(&self) -> crate::Result<bool> {
        let message = self
            .queue
            .claim(&self.prefixes, &self.worker_id, self.config.visibility_timeout)
            .await?;

        let Some(message) = message else {
            return Ok(false); // Nothing visible
        };

        debug!(
            message_id = %message.id,
            queue = %message.queue_name,
            attempt = message.attempt,
            "Processing message"
        );

        let Some(handler) = self.router.route(&message.queue_name) else {
            let error_msg = format!("no handler for queue {}", message.queue_name);
            warn!(message_id = %message.id, error = %error_msg, "Dead letter: unroutable message");
            self.queue.dead_letter(message.id, &error_msg).await?;
            return Ok(true);
        };

        let meta = MessageMeta {
            message_id: message.id,
            attempt: message.attempt,
            queue_name: message.queue_name.clone(),
        };

        match handler.handle(message.payload.clone(), meta).await {
            Ok(response) => match response.timeout {
                None => {
                    self.queue.acknowledge(message.id).await?;
                    debug!(message_id = %message.id, "Message processed");
                }
                Some(delay) => {
                    let rescheduled = self.queue.reschedule(message.id, delay, None).await?;
                    if rescheduled.truncated() {
                        warn!(
                            message_id = %message.id,
                            requested = ?rescheduled.requested,
                            applied = ?rescheduled.applied,
                            "Requested delay exceeds the queue's maximum visibility, truncated"
                        );
                    } else {
                        debug!(message_id = %message.id, delay = ?delay, "Message rescheduled");
                    }
                }
            },
            Err(e) => self.record_failure(&message, &e.to_string()).await?,
        }

        Ok(true)
    }

    async fn record_failure(&self, message: &QueueMessage, error: &str) -> crate::Result<()> {
        if message.attempt >= self.config.max_delivery_attempts {
            warn!(
                message_id = %message.id,
                error = %error,
                attempts = message.attempt,
                max_attempts = self.config.max_delivery_attempts,
                "Message exceeded max deliveries, moving to dead letter"
            );
            return self.queue.dead_letter(message.id, error).await;
        }

        let backoff = self.config.retry_policy.backoff_duration(message.attempt);
        warn!(
            message_id = %message.id,
            error = %error,
            attempt = message.attempt,
            backoff = ?backoff,
            "Handler failed, will redeliver"
        );
        self.queue
            .reschedule(message.id, backoff, Some(error))
            .await
            .map(|_| ())
    }
}
