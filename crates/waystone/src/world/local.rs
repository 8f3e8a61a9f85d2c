//! In-memory world for tests and single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::{
    BeginResult, DeadLetter, HookRecord, MessageId, NewRun, OutgoingMessage, Queue, QueueMessage,
    Rescheduled, RunQuery, RunQueryStore, RunRecord, Store, StoredEvent, StreamChunk, StreamStore,
    UnitOfWork,
};
use crate::error::{Error, Result};
use crate::event::{FailureInfo, RunEvent, RunStatus};
use crate::id::RunId;

/// Configuration for [`LocalWorld`].
#[derive(Debug, Clone)]
pub struct LocalWorldConfig {
    /// Longest delay or visibility timeout the queue honours.
    ///
    /// Longer reschedule requests are truncated. Default: 24 hours.
    pub max_visibility: Duration,
}

impl Default for LocalWorldConfig {
    fn default() -> Self {
        Self {
            max_visibility: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// In-memory world.
///
/// Runs, events, hooks, queue messages and streams live behind a single
/// mutex; per-run tokio mutexes provide the unit-of-work lock. Cloning is
/// cheap and all clones share state, so a "restarted" runtime can be built
/// on the same world to simulate a process crash.
///
/// # Example
///
/// ```
/// use waystone::LocalWorld;
///
/// let world = LocalWorld::new();
/// assert_eq!(world.queue_depth(), 0);
/// ```
#[derive(Clone, Default)]
pub struct LocalWorld {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    config: LocalWorldConfig,
    state: Mutex<LocalState>,
    run_locks: Mutex<HashMap<RunId, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Default)]
struct LocalState {
    runs: HashMap<RunId, RunRecord>,
    events: HashMap<RunId, Vec<StoredEvent>>,
    global_sequence: i64,
    hooks: HashMap<String, HookRecord>,
    messages: Vec<LocalMessage>,
    idempotency_keys: HashMap<String, MessageId>,
    streams: HashMap<(RunId, String), Vec<Value>>,
}

struct LocalMessage {
    id: MessageId,
    queue_name: String,
    payload: Value,
    attempts: u32,
    visible_at: OffsetDateTime,
    idempotency_key: Option<String>,
    locked_by: Option<String>,
    last_error: Option<String>,
    created_at: OffsetDateTime,
    dead: bool,
}

impl LocalState {
    fn enqueue(&mut self, message: OutgoingMessage, now: OffsetDateTime, max: Duration) -> MessageId {
        if let Some(key) = &message.options.idempotency_key {
            if let Some(existing) = self.idempotency_keys.get(key) {
                return *existing;
            }
        }

        let id = MessageId::generate();
        if let Some(key) = &message.options.idempotency_key {
            self.idempotency_keys.insert(key.clone(), id);
        }
        let requested = message.options.delay.unwrap_or_default();
        let delay = Rescheduled::for_enqueue(&message.queue_name, requested, max);
        self.messages.push(LocalMessage {
            id,
            queue_name: message.queue_name,
            payload: message.payload,
            attempts: 0,
            visible_at: now + delay.applied,
            idempotency_key: message.options.idempotency_key,
            locked_by: None,
            last_error: None,
            created_at: now,
            dead: false,
        });
        id
    }

    fn append_event(&mut self, run_id: &RunId, event: RunEvent, now: OffsetDateTime) {
        self.global_sequence += 1;
        let global_sequence = self.global_sequence;
        let events = self.events.entry(run_id.clone()).or_default();
        let sequence = events.len() as i64;
        events.push(StoredEvent {
            global_sequence,
            run_id: run_id.clone(),
            sequence,
            event,
            created_at: now,
        });
    }

    fn message_mut(&mut self, id: MessageId) -> Option<&mut LocalMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

impl LocalWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LocalWorldConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ..Inner::default()
            }),
        }
    }

    /// Number of queued messages that are not dead-lettered.
    pub fn queue_depth(&self) -> usize {
        self.state().messages.iter().filter(|m| !m.dead).count()
    }

    /// Snapshot of all live queue messages, in enqueue order.
    pub fn messages(&self) -> Vec<QueueMessage> {
        self.state()
            .messages
            .iter()
            .filter(|m| !m.dead)
            .map(|m| QueueMessage {
                id: m.id,
                queue_name: m.queue_name.clone(),
                payload: m.payload.clone(),
                attempt: m.attempts,
                created_at: m.created_at,
            })
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn run_lock(&self, run_id: &RunId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .run_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(run_id.clone()).or_default())
    }

    fn load_run(&self, run_id: &RunId) -> Result<(RunRecord, Vec<RunEvent>)> {
        let state = self.state();
        let run = state
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::RunNotFound(run_id.clone()))?;
        let events = state
            .events
            .get(run_id)
            .map(|events| events.iter().map(|e| e.event.clone()).collect())
            .unwrap_or_default();
        Ok((run, events))
    }
}

/// Unit of work over a [`LocalWorld`] run.
///
/// Holds the run's lock until committed or dropped.
pub struct LocalUnitOfWork<'a> {
    world: &'a LocalWorld,
    run_id: RunId,
    _guard: OwnedMutexGuard<()>,
    events: Vec<RunEvent>,
    messages: Vec<OutgoingMessage>,
    hooks: Vec<HookRecord>,
    disposed: Vec<String>,
    status: Option<RunStatus>,
    output: Option<Value>,
    error: Option<FailureInfo>,
}

impl Store for LocalWorld {
    type UnitOfWork<'a> = LocalUnitOfWork<'a>;

    async fn create_run(&self, run: NewRun, first_message: OutgoingMessage) -> Result<RunRecord> {
        let now = OffsetDateTime::now_utc();
        let max = self.max_visibility();
        let mut state = self.state();
        if state.runs.contains_key(&run.run_id) {
            return Err(Error::InvalidInvocation(format!(
                "run {} already exists",
                run.run_id
            )));
        }

        let record = RunRecord {
            run_id: run.run_id.clone(),
            workflow_id: run.workflow_id.to_string(),
            status: RunStatus::Pending,
            input: run.input.clone(),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        state.runs.insert(run.run_id.clone(), record.clone());
        state.append_event(
            &run.run_id,
            RunEvent::RunCreated {
                workflow_id: run.workflow_id.to_string(),
                input: run.input,
            },
            now,
        );
        state.enqueue(first_message, now, max);
        Ok(record)
    }

    async fn begin<'a>(&'a self, run_id: &RunId) -> Result<BeginResult<LocalUnitOfWork<'a>>> {
        let (run, _) = self.load_run(run_id)?;
        if run.status.is_terminal() {
            return Ok(BeginResult::Finished(run));
        }

        let guard = self.run_lock(run_id).lock_owned().await;

        // Reload under the lock; the previous holder may have finished the run.
        let (run, events) = self.load_run(run_id)?;
        if run.status.is_terminal() {
            return Ok(BeginResult::Finished(run));
        }

        Ok(BeginResult::Active {
            run,
            events,
            uow: LocalUnitOfWork {
                world: self,
                run_id: run_id.clone(),
                _guard: guard,
                events: Vec::new(),
                messages: Vec::new(),
                hooks: Vec::new(),
                disposed: Vec::new(),
                status: None,
                output: None,
                error: None,
            },
        })
    }
}

impl UnitOfWork for LocalUnitOfWork<'_> {
    async fn append_events(&mut self, events: Vec<RunEvent>) -> Result<()> {
        self.events.extend(events);
        Ok(())
    }

    async fn enqueue(&mut self, message: OutgoingMessage) -> Result<()> {
        self.messages.push(message);
        Ok(())
    }

    async fn register_hook(&mut self, hook: HookRecord) -> Result<()> {
        self.hooks.push(hook);
        Ok(())
    }

    async fn dispose_hooks(&mut self, tokens: Vec<String>) -> Result<()> {
        self.disposed.extend(tokens);
        Ok(())
    }

    fn set_status(&mut self, status: RunStatus) {
        self.status = Some(status);
    }

    fn set_output(&mut self, output: Value) {
        self.output = Some(output);
    }

    fn set_error(&mut self, error: FailureInfo) {
        self.error = Some(error);
    }

    async fn commit(self) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let max = self.world.max_visibility();
        let mut state = self.world.state();

        let mut claimed = HashSet::new();
        for hook in &self.hooks {
            let held = state.hooks.contains_key(&hook.token) && !self.disposed.contains(&hook.token);
            if held || !claimed.insert(hook.token.as_str()) {
                return Err(Error::HookConflict(hook.token.clone()));
            }
        }

        for event in self.events {
            state.append_event(&self.run_id, event, now);
        }
        for message in self.messages {
            state.enqueue(message, now, max);
        }
        for token in &self.disposed {
            state.hooks.remove(token);
        }
        for hook in self.hooks {
            state.hooks.insert(hook.token.clone(), hook);
        }

        if let Some(run) = state.runs.get_mut(&self.run_id) {
            if let Some(status) = self.status {
                run.status = status;
            }
            if let Some(output) = self.output {
                run.output = Some(output);
            }
            if let Some(error) = self.error {
                run.error = Some(error);
            }
            run.updated_at = now;
        }

        debug!(run_id = %self.run_id, "Committed local unit of work");
        Ok(())
    }
}

impl Queue for LocalWorld {
    async fn enqueue(&self, message: OutgoingMessage) -> Result<MessageId> {
        let now = OffsetDateTime::now_utc();
        let max = self.max_visibility();
        Ok(self.state().enqueue(message, now, max))
    }

    async fn claim(
        &self,
        prefixes: &[String],
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<QueueMessage>> {
        let now = OffsetDateTime::now_utc();
        let visibility = visibility.min(self.max_visibility());
        let mut state = self.state();

        let Some(message) = state.messages.iter_mut().find(|m| {
            !m.dead
                && m.visible_at <= now
                && prefixes.iter().any(|p| m.queue_name.starts_with(p.as_str()))
        }) else {
            return Ok(None);
        };

        message.attempts += 1;
        message.visible_at = now + visibility;
        message.locked_by = Some(worker_id.to_string());

        Ok(Some(QueueMessage {
            id: message.id,
            queue_name: message.queue_name.clone(),
            payload: message.payload.clone(),
            attempt: message.attempts,
            created_at: message.created_at,
        }))
    }

    async fn acknowledge(&self, id: MessageId) -> Result<()> {
        let mut state = self.state();
        let Some(index) = state.messages.iter().position(|m| m.id == id) else {
            return Ok(());
        };
        let message = state.messages.remove(index);
        if let Some(key) = message.idempotency_key {
            state.idempotency_keys.remove(&key);
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: MessageId,
        delay: Duration,
        error: Option<&str>,
    ) -> Result<Rescheduled> {
        let rescheduled = Rescheduled::new(delay, self.max_visibility());
        let now = OffsetDateTime::now_utc();
        let mut state = self.state();
        if let Some(message) = state.message_mut(id) {
            message.visible_at = now + rescheduled.applied;
            message.locked_by = None;
            if let Some(error) = error {
                message.last_error = Some(error.to_string());
            }
        }
        Ok(rescheduled)
    }

    async fn dead_letter(&self, id: MessageId, error: &str) -> Result<()> {
        let mut state = self.state();
        if let Some(message) = state.message_mut(id) {
            message.dead = true;
            message.locked_by = None;
            message.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn fetch_dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>> {
        Ok(self
            .state()
            .messages
            .iter()
            .filter(|m| m.dead)
            .take(limit as usize)
            .map(|m| DeadLetter {
                id: m.id,
                queue_name: m.queue_name.clone(),
                payload: m.payload.clone(),
                attempts: m.attempts,
                last_error: m.last_error.clone(),
                created_at: m.created_at,
            })
            .collect())
    }

    async fn retry_dead_letter(&self, id: MessageId) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state();
        match state.message_mut(id) {
            Some(message) if message.dead => {
                message.dead = false;
                message.attempts = 0;
                message.visible_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn max_visibility(&self) -> Duration {
        self.inner.config.max_visibility
    }
}

#[async_trait]
impl RunQueryStore for LocalWorld {
    async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        Ok(self.state().runs.get(run_id).cloned())
    }

    async fn fetch_run_events(&self, run_id: &RunId) -> Result<Vec<StoredEvent>> {
        Ok(self
            .state()
            .events
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        let state = self.state();
        let mut runs: Vec<RunRecord> = state
            .runs
            .values()
            .filter(|run| {
                query
                    .workflow_id
                    .as_deref()
                    .is_none_or(|id| run.workflow_id == id)
            })
            .filter(|run| query.status.is_none_or(|status| run.status == status))
            .cloned()
            .collect();
        runs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });

        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(runs
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .collect())
    }

    async fn find_hook(&self, token: &str) -> Result<Option<HookRecord>> {
        Ok(self.state().hooks.get(token).cloned())
    }
}

#[async_trait]
impl StreamStore for LocalWorld {
    async fn write_chunk(&self, run_id: &RunId, stream: &str, chunk: Value) -> Result<u64> {
        let mut state = self.state();
        let chunks = state
            .streams
            .entry((run_id.clone(), stream.to_string()))
            .or_default();
        chunks.push(chunk);
        Ok(chunks.len() as u64 - 1)
    }

    async fn read_chunks(
        &self,
        run_id: &RunId,
        stream: &str,
        from: u64,
        limit: u32,
    ) -> Result<Vec<StreamChunk>> {
        let state = self.state();
        let Some(chunks) = state.streams.get(&(run_id.clone(), stream.to_string())) else {
            return Ok(Vec::new());
        };
        Ok(chunks
            .iter()
            .enumerate()
            .skip(from as usize)
            .take(limit as usize)
            .map(|(index, chunk)| StreamChunk {
                index: index as u64,
                chunk: chunk.clone(),
            })
            .collect())
    }
}
