//! Storage and queue abstraction ("world") the runtime executes against.
//!
//! A world bundles four concerns:
//!
//! - [`Store`] / [`UnitOfWork`] — per-run locked, transactional access to the
//!   run log, hook registrations and outgoing queue messages
//! - [`RunQueryStore`] — read-only inspection of runs, events and hooks
//! - [`Queue`] — at-least-once message delivery with visibility timeouts
//! - [`StreamStore`] — per-run output streams written by steps
//!
//! Two implementations are provided:
//!
//! - [`LocalWorld`] — in-memory, for tests and single-process use
//! - [`PgWorld`] — PostgreSQL (requires `postgres` feature)

mod local;
#[cfg(feature = "postgres")]
mod postgres;
mod queue;

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub use local::{LocalWorld, LocalWorldConfig};
#[cfg(feature = "postgres")]
pub use postgres::PgWorld;
pub use queue::{
    DeadLetter, EnqueueOptions, MessageId, OutgoingMessage, Queue, QueueMessage, Rescheduled,
};

use crate::error::Result;
use crate::event::{FailureInfo, RunEvent, RunStatus};
use crate::id::{FunctionId, RunId};

/// Name of the stream [`StepContext::write`](crate::StepContext::write) appends to.
pub const DEFAULT_STREAM: &str = "default";

/// Everything the runtime needs from a backend.
pub trait World: Store + RunQueryStore + Queue + StreamStore {}

impl<T> World for T where T: Store + RunQueryStore + Queue + StreamStore {}

/// A run to be created by [`Store::create_run`].
#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: RunId,
    pub workflow_id: FunctionId,
    pub input: Value,
}

/// Stored run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub workflow_id: String,
    pub status: RunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<FailureInfo>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Stored event with ordering metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub global_sequence: i64,
    pub run_id: RunId,
    pub sequence: i64,
    pub event: RunEvent,
    pub created_at: OffsetDateTime,
}

/// A registered hook wait-point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRecord {
    pub token: String,
    pub run_id: RunId,
    pub seq: u32,
    pub schema: Value,
    pub metadata: Value,
    pub created_at: OffsetDateTime,
}

/// Filter for [`RunQueryStore::list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    pub workflow_id: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl RunQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// A chunk read from a run's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Position within the stream (0-indexed).
    pub index: u64,
    pub chunk: Value,
}

/// Result of beginning a unit of work.
///
/// Indicates whether the run can still make progress or has already reached a
/// terminal status.
pub enum BeginResult<U> {
    /// Run is active; the lock is held by `uow`.
    Active {
        run: RunRecord,
        /// Existing events for replay.
        events: Vec<RunEvent>,
        uow: U,
    },
    /// Run is terminal. No lock held; the caller should skip processing.
    Finished(RunRecord),
}

/// Storage backend for run logs.
///
/// Implementations must provide transactional semantics with per-run
/// locking. [`Store::begin`] acquires an exclusive lock on the run, so a
/// workflow turn and a step result for the same run never interleave.
pub trait Store: Send + Sync + Clone + 'static {
    /// The unit of work type returned by this store.
    type UnitOfWork<'a>: UnitOfWork + Send
    where
        Self: 'a;

    /// Create a run, record `RunCreated` and enqueue its first message.
    ///
    /// The run and the message are persisted atomically.
    fn create_run(
        &self,
        run: NewRun,
        first_message: OutgoingMessage,
    ) -> impl Future<Output = Result<RunRecord>> + Send;

    /// Begin a unit of work for a run.
    ///
    /// This method:
    /// 1. Returns `Finished` if the run is terminal
    /// 2. Acquires an exclusive lock on the run
    /// 3. Loads all existing events for replay
    /// 4. Returns a unit of work for appending events and enqueueing messages
    ///
    /// The lock is held until the unit of work is committed or dropped.
    /// Fails with [`Error::RunNotFound`](crate::Error::RunNotFound) for unknown runs.
    fn begin<'a>(
        &'a self,
        run_id: &RunId,
    ) -> impl Future<Output = Result<BeginResult<Self::UnitOfWork<'a>>>> + Send;
}

/// A transactional unit of work for a single run.
///
/// Changes are only persisted when [`commit`](Self::commit) is called;
/// dropping the unit of work without committing discards them.
pub trait UnitOfWork: Send {
    /// Append events to the run log.
    fn append_events(&mut self, events: Vec<RunEvent>) -> impl Future<Output = Result<()>> + Send;

    /// Enqueue a message that becomes visible on commit (transactional outbox).
    fn enqueue(&mut self, message: OutgoingMessage) -> impl Future<Output = Result<()>> + Send;

    /// Register a hook token.
    ///
    /// Fails with [`Error::HookConflict`](crate::Error::HookConflict) if
    /// another live hook holds the token, either here or on commit.
    fn register_hook(&mut self, hook: HookRecord) -> impl Future<Output = Result<()>> + Send;

    /// Release hook tokens so they can no longer be resumed.
    fn dispose_hooks(&mut self, tokens: Vec<String>) -> impl Future<Output = Result<()>> + Send;

    /// Set the run status stored on commit.
    fn set_status(&mut self, status: RunStatus);

    /// Record the run's return value.
    fn set_output(&mut self, output: Value);

    /// Record the run's failure.
    fn set_error(&mut self, error: FailureInfo);

    /// Commit the unit of work, persisting all changes and releasing the lock.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

/// Query-only store operations for inspecting runs.
#[async_trait]
pub trait RunQueryStore: Send + Sync + Clone + 'static {
    async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>>;

    /// Fetch all events of a run ordered by sequence.
    async fn fetch_run_events(&self, run_id: &RunId) -> Result<Vec<StoredEvent>>;

    /// List runs, newest first.
    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>>;

    /// Look up a live hook by token.
    async fn find_hook(&self, token: &str) -> Result<Option<HookRecord>>;
}

/// Per-run output streams.
///
/// Object safe, so step contexts can hold it without knowing the world type.
#[async_trait]
pub trait StreamStore: Send + Sync + 'static {
    /// Append a chunk, returning its index.
    async fn write_chunk(&self, run_id: &RunId, stream: &str, chunk: Value) -> Result<u64>;

    /// Read up to `limit` chunks with `index >= from`.
    async fn read_chunks(
        &self,
        run_id: &RunId,
        stream: &str,
        from: u64,
        limit: u32,
    ) -> Result<Vec<StreamChunk>>;
}
