//! Queue contract: at-least-once delivery with visibility timeouts.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

/// Unique identifier of a queue message (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery options for [`Queue::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Delay before the message first becomes visible.
    pub delay: Option<Duration>,
    /// Messages sharing a key are enqueued at most once.
    pub idempotency_key: Option<String>,
}

/// A message to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub queue_name: String,
    pub payload: Value,
    pub options: EnqueueOptions,
}

impl OutgoingMessage {
    pub fn new(queue_name: impl Into<String>, payload: Value) -> Self {
        Self {
            queue_name: queue_name.into(),
            payload,
            options: EnqueueOptions::default(),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.options.delay = Some(delay);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.options.idempotency_key = Some(key.into());
        self
    }
}

/// A claimed message, invisible to other consumers until its visibility
/// timeout expires.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub id: MessageId,
    pub queue_name: String,
    pub payload: Value,
    /// Delivery attempt (1-based), incremented on every claim.
    pub attempt: u32,
    pub created_at: OffsetDateTime,
}

/// Outcome of [`Queue::reschedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rescheduled {
    /// The delay the caller asked for.
    pub requested: Duration,
    /// The delay the backend applied after capping to its visibility window.
    pub applied: Duration,
}

impl Rescheduled {
    pub fn new(requested: Duration, max_visibility: Duration) -> Self {
        Self {
            requested,
            applied: requested.min(max_visibility),
        }
    }

    /// Cap the delay of a message being enqueued, logging when it is cut.
    pub(crate) fn for_enqueue(
        queue_name: &str,
        requested: Duration,
        max_visibility: Duration,
    ) -> Self {
        let delay = Self::new(requested, max_visibility);
        if delay.truncated() {
            warn!(
                queue_name,
                requested = ?delay.requested,
                applied = ?delay.applied,
                "Requested enqueue delay exceeds the queue's maximum visibility, truncated"
            );
        }
        delay
    }

    /// Whether the requested delay exceeded the backend's maximum.
    pub fn truncated(&self) -> bool {
        self.applied < self.requested
    }
}

/// A message that exhausted its delivery attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub id: MessageId,
    pub queue_name: String,
    pub payload: Value,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
}

/// At-least-once message queue.
///
/// # Delivery Protocol
///
/// 1. [`claim`](Self::claim) atomically picks a visible message and hides it
///    for `visibility`
/// 2. The consumer calls [`acknowledge`](Self::acknowledge) on success or
///    [`reschedule`](Self::reschedule) to make it visible again later
/// 3. If the consumer crashes, the message becomes visible again when its
///    visibility timeout expires and is redelivered
pub trait Queue: Send + Sync + Clone + 'static {
    /// Enqueue a message.
    ///
    /// If `idempotency_key` matches an earlier message, that message's id is
    /// returned and nothing new is enqueued. A key is held at least until its
    /// message is acknowledged; backends may release it afterwards.
    ///
    /// Delays above [`max_visibility`](Self::max_visibility) are truncated
    /// and logged at `warn`.
    fn enqueue(&self, message: OutgoingMessage) -> impl Future<Output = Result<MessageId>> + Send;

    /// Claim the oldest visible message whose queue name starts with one of
    /// `prefixes`.
    ///
    /// The visibility timeout is capped to [`max_visibility`](Self::max_visibility).
    fn claim(
        &self,
        prefixes: &[String],
        worker_id: &str,
        visibility: Duration,
    ) -> impl Future<Output = Result<Option<QueueMessage>>> + Send;

    /// Remove a processed message.
    fn acknowledge(&self, id: MessageId) -> impl Future<Output = Result<()>> + Send;

    /// Make a claimed message visible again after `delay`.
    ///
    /// Delays above [`max_visibility`](Self::max_visibility) are truncated;
    /// the returned [`Rescheduled`] reports what was applied.
    fn reschedule(
        &self,
        id: MessageId,
        delay: Duration,
        error: Option<&str>,
    ) -> impl Future<Output = Result<Rescheduled>> + Send;

    /// Stop delivering a message and keep it for inspection.
    fn dead_letter(&self, id: MessageId, error: &str) -> impl Future<Output = Result<()>> + Send;

    /// Fetch dead-lettered messages, oldest first.
    fn fetch_dead_letters(&self, limit: u32) -> impl Future<Output = Result<Vec<DeadLetter>>> + Send;

    /// Make a dead-lettered message deliverable again.
    ///
    /// Returns `Ok(false)` if no such dead letter exists.
    fn retry_dead_letter(&self, id: MessageId) -> impl Future<Output = Result<bool>> + Send;

    /// Longest delay or visibility timeout this backend honours.
    fn max_visibility(&self) -> Duration;
}
