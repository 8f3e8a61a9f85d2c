//! Runtime for executing workflow turns and step jobs.
//!
//! This module provides the infrastructure that consumes the queue:
//!
//! - [`WorkflowRuntime`] — coordinator that runs workflow and step workers
//! - [`WorkflowBuilder`] — registers workflows and steps and configures the runtime
//! - [`RuntimeConfig`] — polling intervals, timeouts, retry policy, worker counts
//! - [`QueueRouter`] / [`QueueHandler`] — prefix-based message dispatch
//!
//! # Example
//!
//! ```ignore
//! use waystone::{LocalWorld, RuntimeConfig, WorkflowRuntime, WorkflowServiceConfig};
//!
//! let engine = WorkflowRuntime::builder(LocalWorld::new(), WorkflowServiceConfig::default())
//!     .workflow(Checkout)
//!     .step(ChargeCard)
//!     .config(RuntimeConfig::default())
//!     .build_engine()?;
//!
//! let handle = engine.service.start::<Checkout>(&order).await?;
//! engine.runtime.run(shutdown_signal).await?;
//! ```

mod config;
mod queue_worker;
pub(crate) mod registry;
mod router;
mod step_worker;
mod workflow_worker;

pub use config::RuntimeConfig;
pub use registry::{WorkflowBuilder, WorkflowRuntime};
pub use router::{HandlerResponse, MessageMeta, QueueHandler, QueueRouter};
