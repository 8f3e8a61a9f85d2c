//! Step execution context with correlation and idempotency metadata.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::closure::ClosureVars;
use crate::error::Result;
use crate::id::{FunctionId, RunId};
use crate::world::{DEFAULT_STREAM, MessageId, StreamStore};

/// Context provided to step functions during execution.
///
/// # Idempotency
///
/// Steps have **at-least-once** execution semantics: a step may run again if
/// the worker crashes before its result is recorded. Use
/// [`idempotency_key()`](Self::idempotency_key) when calling external APIs that
/// support idempotency keys. The key is stable across retries and
/// redeliveries but unique per step call.
///
/// # Example
///
/// ```ignore
/// async fn run(&self, order: Order, ctx: &StepContext) -> Result<Receipt, StepError> {
///     let count: u32 = ctx.closure_var("count")?;
///     let receipt = self.payments
///         .charge(order.total * count, ctx.idempotency_key())
///         .await?;
///     ctx.write(&serde_json::json!({ "charged": receipt.id })).await?;
///     Ok(receipt)
/// }
/// ```
#[derive(Clone)]
pub struct StepContext {
    pub(crate) run_id: RunId,
    pub(crate) seq: u32,
    pub(crate) step_id: FunctionId,
    pub(crate) attempt: u32,
    pub(crate) message_id: MessageId,
    pub(crate) closure: ClosureVars,
    pub(crate) streams: Arc<dyn StreamStore>,
}

impl StepContext {
    /// The run this call belongs to.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Call sequence of this invocation within the run.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn step_id(&self) -> &FunctionId {
        &self.step_id
    }

    /// Current attempt number (1-based), counted from the run log.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Queue message that delivered this attempt.
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Stable key for this step call: `<run_id>:<seq>`.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.run_id, self.seq)
    }

    /// Resolve captured closure variables.
    ///
    /// Counterpart of `__private_getClosureVars()` in transformed modules.
    pub fn closure_vars(&self) -> &ClosureVars {
        &self.closure
    }

    /// Resolve one captured variable by name.
    pub fn closure_var<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.closure.get(name)
    }

    /// Append a chunk to the run's default output stream.
    pub async fn write<T: Serialize + ?Sized>(&self, chunk: &T) -> Result<u64> {
        self.write_to(DEFAULT_STREAM, chunk).await
    }

    /// Append a chunk to a named output stream of the run.
    pub async fn write_to<T: Serialize + ?Sized>(&self, stream: &str, chunk: &T) -> Result<u64> {
        let chunk = serde_json::to_value(chunk)?;
        self.streams.write_chunk(&self.run_id, stream, chunk).await
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("run_id", &self.run_id)
            .field("seq", &self.seq)
            .field("step_id", &self.step_id)
            .field("attempt", &self.attempt)
            .field("message_id", &self.message_id)
            .field("closure", &self.closure)
            .finish_non_exhaustive()
    }
}
