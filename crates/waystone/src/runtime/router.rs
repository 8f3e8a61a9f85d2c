//! Routing of claimed queue messages to handlers by queue-name prefix.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::world::MessageId;

/// Delivery metadata passed to a [`QueueHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
    pub message_id: MessageId,
    /// Delivery attempt (1-based).
    pub attempt: u32,
    pub queue_name: String,
}

/// What to do with a message after its handler returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerResponse {
    /// `None` acknowledges the message; `Some(delay)` redelivers it after
    /// `delay` instead.
    pub timeout: Option<Duration>,
}

impl HandlerResponse {
    /// Acknowledge the message.
    pub fn done() -> Self {
        Self { timeout: None }
    }

    /// Redeliver the message after `delay`.
    pub fn retry_after(delay: Duration) -> Self {
        Self {
            timeout: Some(delay),
        }
    }
}

/// Consumer of messages on one queue-name prefix.
///
/// Returning `Err` counts as a failed delivery: the message is redelivered
/// with backoff and dead-lettered once it exceeds
/// [`RuntimeConfig::max_delivery_attempts`](crate::RuntimeConfig::max_delivery_attempts).
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Value, meta: MessageMeta) -> Result<HandlerResponse>;
}

/// Maps queue-name prefixes to handlers.
#[derive(Default, Clone)]
pub struct QueueRouter {
    handlers: Vec<(String, Arc<dyn QueueHandler>)>,
}

impl QueueRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every queue whose name starts with `prefix`.
    ///
    /// Fails with [`Error::DuplicateRegistration`] if the prefix is taken.
    pub fn register_handler(
        &mut self,
        prefix: impl Into<String>,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<()> {
        let prefix = prefix.into();
        if self.handlers.iter().any(|(existing, _)| *existing == prefix) {
            return Err(Error::DuplicateRegistration(format!(
                "queue handler for prefix `{prefix}`"
            )));
        }
        self.handlers.push((prefix, handler));
        Ok(())
    }

    /// All registered prefixes, in registration order.
    pub fn prefixes(&self) -> Vec<String> {
        self.handlers.iter().map(|(prefix, _)| prefix.clone()).collect()
    }

    /// The handler with the longest prefix matching `queue_name`.
    pub fn route(&self, queue_name: &str) -> Option<&Arc<dyn QueueHandler>> {
        self.handlers
            .iter()
            .filter(|(prefix, _)| queue_name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, handler)| handler)
    }
}

impl std::fmt::Debug for QueueRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRouter")
            .field("prefixes", &self.prefixes())
            .finish()
    }
}
