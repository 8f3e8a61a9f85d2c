//! Workflow engine bundle.

use std::sync::Arc;

use crate::runtime::WorkflowRuntime;
use crate::service::WorkflowService;
use crate::world::World;

/// Convenience bundle for a service + runtime pair sharing one world.
#[derive(Clone)]
pub struct WorkflowEngine<W: World> {
    pub service: Arc<WorkflowService<W>>,
    pub runtime: WorkflowRuntime<W>,
}
