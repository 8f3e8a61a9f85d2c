//! Handles to started runs.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::time::Duration;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::RunStatus;
use crate::id::RunId;
use crate::world::{DEFAULT_STREAM, RunRecord, StoredEvent, World};

const CHUNK_BATCH: u32 = 100;

/// Handle to a run, typed by the workflow's output.
///
/// Obtained from [`WorkflowService::start`](crate::WorkflowService::start)
/// or [`WorkflowService::get_run`](crate::WorkflowService::get_run).
///
/// ```ignore
/// let handle = service.start::<Checkout>(&order).await?;
/// let mut progress = handle.readable();
/// while let Some(chunk) = progress.try_next().await? {
///     println!("{chunk}");
/// }
/// let receipt = handle.return_value().await?;
/// ```
pub struct RunHandle<W, O = Value> {
    world: W,
    run_id: RunId,
    poll_interval: Duration,
    _marker: PhantomData<fn() -> O>,
}

impl<W: Clone, O> Clone for RunHandle<W, O> {
    fn clone(&self) -> Self {
        Self {
            world: self.world.clone(),
            run_id: self.run_id.clone(),
            poll_interval: self.poll_interval,
            _marker: PhantomData,
        }
    }
}

impl<W: World, O> RunHandle<W, O> {
    pub(crate) fn new(world: W, run_id: RunId, poll_interval: Duration) -> Self {
        Self {
            world,
            run_id,
            poll_interval,
            _marker: PhantomData,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub async fn record(&self) -> Result<RunRecord> {
        self.world
            .get_run(&self.run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(self.run_id.clone()))
    }

    pub async fn status(&self) -> Result<RunStatus> {
        Ok(self.record().await?.status)
    }

    /// The run's event log.
    pub async fn events(&self) -> Result<Vec<StoredEvent>> {
        self.world.fetch_run_events(&self.run_id).await
    }

    /// Chunks written to the run's default stream.
    ///
    /// The stream ends once the run is terminal and every chunk has been read.
    pub fn readable(&self) -> impl Stream<Item = Result<Value>> + Send + use<W, O> {
        self.readable_from(DEFAULT_STREAM)
    }

    /// Chunks written to a named stream of the run.
    pub fn readable_from(
        &self,
        stream: &str,
    ) -> impl Stream<Item = Result<Value>> + Send + use<W, O> {
        let reader = ChunkReader {
            world: self.world.clone(),
            run_id: self.run_id.clone(),
            stream: stream.to_string(),
            poll_interval: self.poll_interval,
            next: 0,
            buffer: VecDeque::new(),
            done: false,
        };
        futures::stream::unfold(reader, |mut reader| async move {
            let item = reader.next().await?;
            Some((item, reader))
        })
    }
}

impl<W: World, O: DeserializeOwned> RunHandle<W, O> {
    /// Wait for the run to finish and return its output.
    ///
    /// Fails with [`Error::RunFailed`] or [`Error::RunCancelled`] if the run
    /// did not complete.
    pub async fn return_value(&self) -> Result<O> {
        loop {
            let run = self.record().await?;
            match run.status {
                RunStatus::Completed => {
                    return Ok(serde_json::from_value(run.output.unwrap_or(Value::Null))?);
                }
                RunStatus::Failed => {
                    return Err(Error::RunFailed {
                        run_id: run.run_id,
                        error: run.error.unwrap_or_else(|| {
                            crate::FailureInfo::new(crate::FailureKind::Workflow, "unknown failure")
                        }),
                    });
                }
                RunStatus::Cancelled => return Err(Error::RunCancelled(run.run_id)),
                RunStatus::Pending | RunStatus::Running | RunStatus::Suspended => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

impl<W, O> std::fmt::Debug for RunHandle<W, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

struct ChunkReader<W> {
    world: W,
    run_id: RunId,
    stream: String,
    poll_interval: Duration,
    next: u64,
    buffer: VecDeque<Value>,
    done: bool,
}

impl<W: World> ChunkReader<W> {
    async fn next(&mut self) -> Option<Result<Value>> {
        loop {
            if let Some(chunk) = self.buffer.pop_front() {
                return Some(Ok(chunk));
            }
            if self.done {
                return None;
            }
            match self.fill().await {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Fetch the next batch. Returns `false` when nothing new was available.
    async fn fill(&mut self) -> Result<bool> {
        // Status first: chunks written before the run ended are then visible.
        let terminal = self
            .world
            .get_run(&self.run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(self.run_id.clone()))?
            .status
            .is_terminal();

        let chunks = self
            .world
            .read_chunks(&self.run_id, &self.stream, self.next, CHUNK_BATCH)
            .await?;
        if let Some(last) = chunks.last() {
            self.next = last.index + 1;
        }
        let fetched = !chunks.is_empty();
        self.buffer.extend(chunks.into_iter().map(|c| c.chunk));

        if !fetched && terminal {
            self.done = true;
            return Ok(true);
        }
        Ok(fetched)
    }
}
