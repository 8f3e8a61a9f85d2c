//! Error types for waystone.

use thiserror::Error;

use crate::event::{FailureInfo, RunStatus};
use crate::id::RunId;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in waystone operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize a payload, event or step value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored run event could not be decoded during replay.
    #[error("failed to decode event at sequence {sequence} for run {run_id}: {source}")]
    EventDeserialization {
        /// The run whose log contains the event.
        run_id: RunId,
        /// Position of the event in the run log (0-indexed).
        sequence: usize,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// PostgreSQL storage error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// PostgreSQL migration error.
    #[cfg(feature = "postgres")]
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A string does not follow the `kind//source//path` identifier format.
    #[error("invalid function identifier `{0}`")]
    InvalidIdentifier(String),

    /// A workflow or step was invoked without being registered.
    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),

    /// The same identifier was registered more than once.
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// No run exists with the given id.
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// The run already reached a terminal status.
    #[error("run {run_id} is already {status}")]
    RunFinished {
        /// The run that was addressed.
        run_id: RunId,
        /// Its terminal status.
        status: RunStatus,
    },

    /// A step call finished with a fatal error. Raised at the call site.
    #[error("step {step_id} (call {seq}) failed: {message}")]
    StepFailed {
        /// Identifier of the failed step.
        step_id: String,
        /// Call sequence of the failed call within the run.
        seq: u32,
        /// The recorded failure message.
        message: String,
    },

    /// The run finished with a failure. Returned by [`RunHandle::return_value`](crate::RunHandle::return_value).
    #[error("run {run_id} failed: {}", error.message)]
    RunFailed {
        /// The failed run.
        run_id: RunId,
        /// Recorded failure details.
        error: FailureInfo,
    },

    /// The run was cancelled before it completed.
    #[error("run {0} was cancelled")]
    RunCancelled(RunId),

    /// The workflow body issued a different call than its replay log recorded.
    #[error("replay divergence at call {seq}: {message}")]
    ReplayDivergence {
        /// Call sequence where the mismatch was found.
        seq: u32,
        /// What was expected and what was issued.
        message: String,
    },

    /// A hook token is not registered (or was disposed).
    #[error("hook not found: {0}")]
    HookNotFound(String),

    /// A hook token is already held by another live wait-point.
    #[error("hook token `{0}` is already in use")]
    HookConflict(String),

    /// The hook already received its terminal event.
    #[error("hook `{0}` is closed")]
    HookClosed(String),

    /// A hook payload did not match the hook's schema. Only that payload is rejected.
    #[error("payload for hook `{token}` failed validation: {}", errors.join("; "))]
    HookValidation {
        /// The hook the payload was sent to.
        token: String,
        /// One message per schema violation.
        errors: Vec<String>,
    },

    /// A hook schema is not a valid JSON schema.
    #[error("invalid hook schema: {0}")]
    InvalidSchema(String),

    /// A hook's call sequence does not fit the storage column.
    #[error("hook call sequence {0} is out of range")]
    HookSequenceOutOfRange(i64),

    /// A captured closure variable is missing from the step's closure record.
    #[error("closure variable `{0}` was not captured")]
    MissingClosureVar(String),

    /// Explicit non-retryable failure raised by workflow code.
    #[error("{0}")]
    Fatal(String),
}

impl Error {
    /// Create an event deserialization error with context.
    pub fn event_deserialization(
        run_id: &RunId,
        sequence: usize,
        source: serde_json::Error,
    ) -> Self {
        Error::EventDeserialization {
            run_id: run_id.clone(),
            sequence,
            source,
        }
    }

    /// Create a fatal workflow error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Error::Fatal(message.into())
    }
}
