//! Handler for workflow queue messages: one message, one turn.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::registry::Registry;
use super::router::{HandlerResponse, MessageMeta, QueueHandler};
use crate::error::{Error, Result};
use crate::executor::{TurnOutcome, WorkflowWake, execute_turn};
use crate::world::World;

/// Runs a workflow turn for every message on a `__wkf_workflow_` queue.
///
/// A message may be a start, a wake after a step result or hook event, or
/// the end of a durable sleep. Turns are idempotent: a duplicate message
/// replays the same log and issues nothing new.
pub(crate) struct WorkflowHandler<W: World> {
    world: W,
    registry: Arc<Registry>,
}

impl<W: World> WorkflowHandler<W> {
    pub fn new(world: W, registry: Arc<Registry>) -> Self {
        Self { world, registry }
    }
}

#[async_trait]
impl<W: World> QueueHandler for WorkflowHandler<W> {
    async fn handle(&self, payload: Value, meta: MessageMeta) -> Result<HandlerResponse> {
        let wake: WorkflowWake = serde_json::from_value(payload)?;
        debug!(
            run_id = %wake.run_id,
            message_id = %meta.message_id,
            attempt = meta.attempt,
            "Running workflow turn"
        );

        match execute_turn(&self.world, &self.registry, &wake.run_id, wake.wait_seq).await {
            Ok(TurnOutcome::Early(remaining)) => Ok(HandlerResponse::retry_after(remaining)),
            Ok(_) => Ok(HandlerResponse::done()),
            Err(Error::RunNotFound(run_id)) => {
                warn!(run_id = %run_id, "Discarding message for unknown run");
                Ok(HandlerResponse::done())
            }
            Err(e) => Err(e),
        }
    }
}
