//! PostgreSQL world implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    BeginResult, DeadLetter, HookRecord, MessageId, NewRun, OutgoingMessage, Queue, QueueMessage,
    Rescheduled, RunQuery, RunQueryStore, RunRecord, Store, StoredEvent, StreamChunk, StreamStore,
    UnitOfWork,
};
use crate::error::{Error, Result};
use crate::event::{FailureInfo, RunEvent, RunStatus};
use crate::id::RunId;

/// Upper bound on delays and visibility timeouts.
const MAX_VISIBILITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// PostgreSQL-backed world for production use.
///
/// Uses row-level locking via `SELECT ... FOR UPDATE` on the `runs` table
/// for per-run concurrency control. The lock is held for the duration of the
/// unit of work's transaction and released on commit.
///
/// # Database Schema
///
/// Requires tables in the `waystone` schema (see [`PgWorld::migrate`]):
///
/// | Table            | Purpose                                              |
/// |------------------|------------------------------------------------------|
/// | `runs`           | Run registry, status and row-level locking           |
/// | `events`         | Append-only run logs with `global_sequence`          |
/// | `hooks`          | Live hook tokens (unique across runs)                |
/// | `queue_messages` | Step and workflow queues, including dead letters     |
/// | `stream_chunks`  | Per-run output streams                               |
///
/// # Concurrency
///
/// Different runs execute concurrently (different rows). Units of work for
/// the same run are serialized (row lock blocks). Queue claims use
/// `FOR UPDATE SKIP LOCKED`, so workers never claim the same message twice
/// within a visibility window.
///
/// # Example
///
/// ```ignore
/// use sqlx::PgPool;
/// use waystone::PgWorld;
///
/// let pool = PgPool::connect("postgres://...").await?;
/// let world = PgWorld::new(pool);
/// world.migrate().await?;
/// ```
#[derive(Debug, Clone)]
pub struct PgWorld {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    workflow_id: String,
    status: String,
    input: Value,
    output: Option<Value>,
    error: Option<Value>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord> {
        let error = self
            .error
            .map(serde_json::from_value::<FailureInfo>)
            .transpose()?;
        Ok(RunRecord {
            run_id: RunId::new(self.run_id),
            workflow_id: self.workflow_id,
            status: self.status.parse()?,
            input: self.input,
            output: self.output,
            error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    global_sequence: i64,
    run_id: String,
    sequence: i64,
    payload: Value,
    created_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct HookRow {
    token: String,
    run_id: String,
    seq: i32,
    schema: Value,
    metadata: Value,
    created_at: OffsetDateTime,
}

impl TryFrom<HookRow> for HookRecord {
    type Error = Error;

    fn try_from(row: HookRow) -> Result<Self> {
        let seq = u32::try_from(row.seq)
            .map_err(|_| Error::HookSequenceOutOfRange(i64::from(row.seq)))?;
        Ok(Self {
            token: row.token,
            run_id: RunId::new(row.run_id),
            seq,
            schema: row.schema,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

fn hook_seq_column(seq: u32) -> Result<i32> {
    i32::try_from(seq).map_err(|_| Error::HookSequenceOutOfRange(i64::from(seq)))
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    queue_name: String,
    payload: Value,
    attempts: i32,
    last_error: Option<String>,
    created_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    chunk_index: i64,
    chunk: Value,
}

impl PgWorld {
    /// Create a new PostgreSQL world from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_events(
        tx: &mut Transaction<'_, Postgres>,
        run_id: &RunId,
    ) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT global_sequence, run_id, sequence, payload, created_at
            FROM waystone.events
            WHERE run_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(run_id.as_str())
        .fetch_all(&mut **tx)
        .await?;

        decode_events(rows)
    }
}

fn decode_events(rows: Vec<EventRow>) -> Result<Vec<StoredEvent>> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let run_id = RunId::new(row.run_id);
            let event = serde_json::from_value(row.payload)
                .map_err(|e| Error::event_deserialization(&run_id, index, e))?;
            Ok(StoredEvent {
                global_sequence: row.global_sequence,
                run_id,
                sequence: row.sequence,
                event,
                created_at: row.created_at,
            })
        })
        .collect()
}

async fn insert_message(
    tx: &mut Transaction<'_, Postgres>,
    message: OutgoingMessage,
) -> Result<MessageId> {
    let requested = message.options.delay.unwrap_or_default();
    let delay_secs = Rescheduled::for_enqueue(&message.queue_name, requested, MAX_VISIBILITY)
        .applied
        .as_secs_f64();

    // Delay computed in DB to avoid clock skew between app and DB servers.
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO waystone.queue_messages (id, queue_name, payload, idempotency_key, visible_at)
        VALUES ($1, $2, $3, $4, now() + ($5 * interval '1 second'))
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(MessageId::generate().as_uuid())
    .bind(&message.queue_name)
    .bind(&message.payload)
    .bind(message.options.idempotency_key.as_deref())
    .bind(delay_secs)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(id) = inserted {
        return Ok(MessageId::from(id));
    }

    let existing: Uuid = sqlx::query_scalar(
        "SELECT id FROM waystone.queue_messages WHERE idempotency_key = $1",
    )
    .bind(message.options.idempotency_key.as_deref())
    .fetch_one(&mut **tx)
    .await?;
    Ok(MessageId::from(existing))
}

impl Store for PgWorld {
    type UnitOfWork<'a> = PgUnitOfWork<'a>;

    async fn create_run(&self, run: NewRun, first_message: OutgoingMessage) -> Result<RunRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RunRow>(
            r#"
            INSERT INTO waystone.runs (run_id, workflow_id, status, input)
            VALUES ($1, $2, $3, $4)
            RETURNING run_id, workflow_id, status, input, output, error, created_at, updated_at
            "#,
        )
        .bind(run.run_id.as_str())
        .bind(run.workflow_id.as_str())
        .bind(RunStatus::Pending.as_str())
        .bind(&run.input)
        .fetch_one(&mut *tx)
        .await?;

        let created = serde_json::to_value(RunEvent::RunCreated {
            workflow_id: run.workflow_id.to_string(),
            input: run.input,
        })?;
        sqlx::query(
            r#"INSERT INTO waystone.events (run_id, sequence, payload)
               VALUES ($1, 0, $2)"#,
        )
        .bind(run.run_id.as_str())
        .bind(created)
        .execute(&mut *tx)
        .await?;

        insert_message(&mut tx, first_message).await?;
        tx.commit().await?;

        row.into_record()
    }

    async fn begin<'a>(&'a self, run_id: &RunId) -> Result<BeginResult<PgUnitOfWork<'a>>> {
        let mut tx = self.pool.begin().await?;

        // Acquire row-level lock and check terminal status
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, workflow_id, status, input, output, error, created_at, updated_at
            FROM waystone.runs
            WHERE run_id = $1
            FOR UPDATE
            "#,
        )
        .bind(run_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::RunNotFound(run_id.clone()))?;

        let run = row.into_record()?;
        if run.status.is_terminal() {
            // Transaction is rolled back on drop, releasing the lock
            return Ok(BeginResult::Finished(run));
        }

        let events = Self::load_events(&mut tx, run_id).await?;
        let next_sequence = events.len() as i64;

        Ok(BeginResult::Active {
            run,
            events: events.into_iter().map(|e| e.event).collect(),
            uow: PgUnitOfWork {
                tx,
                run_id: run_id.clone(),
                next_sequence,
                status: None,
                output: None,
                error: None,
            },
        })
    }
}

/// PostgreSQL unit of work.
///
/// Wraps a transaction with the run's row lock held until commit.
pub struct PgUnitOfWork<'a> {
    tx: Transaction<'a, Postgres>,
    run_id: RunId,
    next_sequence: i64,
    status: Option<RunStatus>,
    output: Option<Value>,
    error: Option<FailureInfo>,
}

impl UnitOfWork for PgUnitOfWork<'_> {
    async fn append_events(&mut self, events: Vec<RunEvent>) -> Result<()> {
        for event in events {
            let payload = serde_json::to_value(&event)?;

            sqlx::query(
                r#"INSERT INTO waystone.events (run_id, sequence, payload)
                   VALUES ($1, $2, $3)"#,
            )
            .bind(self.run_id.as_str())
            .bind(self.next_sequence)
            .bind(payload)
            .execute(&mut *self.tx)
            .await?;

            self.next_sequence += 1;
        }
        Ok(())
    }

    async fn enqueue(&mut self, message: OutgoingMessage) -> Result<()> {
        insert_message(&mut self.tx, message).await?;
        Ok(())
    }

    async fn register_hook(&mut self, hook: HookRecord) -> Result<()> {
        let result = sqlx::query(
            r#"INSERT INTO waystone.hooks (token, run_id, seq, schema, metadata, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&hook.token)
        .bind(hook.run_id.as_str())
        .bind(hook_seq_column(hook.seq)?)
        .bind(&hook.schema)
        .bind(&hook.metadata)
        .bind(hook.created_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::HookConflict(hook.token))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn dispose_hooks(&mut self, tokens: Vec<String>) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM waystone.hooks WHERE run_id = $1 AND token = ANY($2)")
            .bind(self.run_id.as_str())
            .bind(&tokens)
            .execute(&mut *self.tx)
            .await?;
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

    async fn commit(mut self) -> Result<()> {
        let error = self.error.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            r#"UPDATE waystone.runs
               SET status = COALESCE($2, status),
                   output = COALESCE($3, output),
                   error = COALESCE($4, error),
                   updated_at = now()
               WHERE run_id = $1"#,
        )
        .bind(self.run_id.as_str())
        .bind(self.status.map(|s| s.as_str()))
        .bind(self.output.as_ref())
        .bind(error)
        .execute(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        Ok(())
    }
}

impl Queue for PgWorld {
    async fn enqueue(&self, message: OutgoingMessage) -> Result<MessageId> {
        let mut tx = self.pool.begin().await?;
        let id = insert_message(&mut tx, message).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn claim(
        &self,
        prefixes: &[String],
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<QueueMessage>> {
        let patterns: Vec<String> = prefixes
            .iter()
            .map(|prefix| format!("{}%", escape_like(prefix)))
            .collect();
        let visibility_secs = visibility.min(MAX_VISIBILITY).as_secs_f64();

        // Atomically claim the oldest visible message using FOR UPDATE SKIP LOCKED.
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE waystone.queue_messages
            SET attempts = attempts + 1,
                visible_at = now() + ($1 * interval '1 second'),
                locked_by = $2
            WHERE id = (
                SELECT id FROM waystone.queue_messages
                WHERE acknowledged_at IS NULL
                  AND dead_at IS NULL
                  AND visible_at <= now()
                  AND queue_name LIKE ANY($3)
                ORDER BY visible_at, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue_name, payload, attempts, last_error, created_at
            "#,
        )
        .bind(visibility_secs)
        .bind(worker_id)
        .bind(&patterns)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| QueueMessage {
            id: MessageId::from(r.id),
            queue_name: r.queue_name,
            payload: r.payload,
            attempt: u32::try_from(r.attempts).unwrap_or_default(),
            created_at: r.created_at,
        }))
    }

    async fn acknowledge(&self, id: MessageId) -> Result<()> {
        // Rows are kept so idempotency keys stay claimed.
        sqlx::query(
            r#"
            UPDATE waystone.queue_messages
            SET acknowledged_at = now(),
                locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: MessageId,
        delay: Duration,
        error: Option<&str>,
    ) -> Result<Rescheduled> {
        let rescheduled = Rescheduled::new(delay, MAX_VISIBILITY);
        sqlx::query(
            r#"
            UPDATE waystone.queue_messages
            SET visible_at = now() + ($2 * interval '1 second'),
                last_error = COALESCE($3, last_error),
                locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(rescheduled.applied.as_secs_f64())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(rescheduled)
    }

    async fn dead_letter(&self, id: MessageId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE waystone.queue_messages
            SET dead_at = now(),
                last_error = $2,
                locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, queue_name, payload, attempts, last_error, created_at
            FROM waystone.queue_messages
            WHERE dead_at IS NOT NULL
              AND acknowledged_at IS NULL
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DeadLetter {
                id: MessageId::from(r.id),
                queue_name: r.queue_name,
                payload: r.payload,
                attempts: u32::try_from(r.attempts).unwrap_or_default(),
                last_error: r.last_error,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn retry_dead_letter(&self, id: MessageId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE waystone.queue_messages
            SET dead_at = NULL,
                attempts = 0,
                visible_at = now(),
                locked_by = NULL
            WHERE id = $1
              AND dead_at IS NOT NULL
              AND acknowledged_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    fn max_visibility(&self) -> Duration {
        MAX_VISIBILITY
    }
}

#[async_trait]
impl RunQueryStore for PgWorld {
    async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, workflow_id, status, input, output, error, created_at, updated_at
            FROM waystone.runs
            WHERE run_id = $1
            "#,
        )
        .bind(run_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(RunRow::into_record)
        .transpose()
    }

    async fn fetch_run_events(&self, run_id: &RunId) -> Result<Vec<StoredEvent>> {
        let mut tx = self.pool.begin().await?;
        Self::load_events(&mut tx, run_id).await
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        let mut builder = sqlx::QueryBuilder::<Postgres>::new(
            r#"
            SELECT run_id, workflow_id, status, input, output, error, created_at, updated_at
            FROM waystone.runs
            WHERE TRUE
            "#,
        );

        if let Some(workflow_id) = &query.workflow_id {
            builder.push(" AND workflow_id = ");
            builder.push_bind(workflow_id.clone());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }

        builder.push(" ORDER BY created_at DESC, run_id DESC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
        }
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(query.offset));

        builder
            .build_query_as::<RunRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(RunRow::into_record)
            .collect()
    }

    async fn find_hook(&self, token: &str) -> Result<Option<HookRecord>> {
        let row = sqlx::query_as::<_, HookRow>(
            r#"
            SELECT token, run_id, seq, schema, metadata, created_at
            FROM waystone.hooks
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(HookRecord::try_from).transpose()
    }
}

#[async_trait]
impl StreamStore for PgWorld {
    async fn write_chunk(&self, run_id: &RunId, stream: &str, chunk: Value) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        // Serialize writers of the same stream so indexes stay dense.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text || '/' || $2::text))")
            .bind(run_id.as_str())
            .bind(stream)
            .execute(&mut *tx)
            .await?;

        let index: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO waystone.stream_chunks (run_id, stream, chunk_index, chunk)
            SELECT $1, $2, COALESCE(MAX(chunk_index) + 1, 0), $3
            FROM waystone.stream_chunks
            WHERE run_id = $1 AND stream = $2
            RETURNING chunk_index
            "#,
        )
        .bind(run_id.as_str())
        .bind(stream)
        .bind(chunk)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(u64::try_from(index).unwrap_or_default())
    }

    async fn read_chunks(
        &self,
        run_id: &RunId,
        stream: &str,
        from: u64,
        limit: u32,
    ) -> Result<Vec<StreamChunk>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT chunk_index, chunk
            FROM waystone.stream_chunks
            WHERE run_id = $1 AND stream = $2 AND chunk_index >= $3
            ORDER BY chunk_index
            LIMIT $4
            "#,
        )
        .bind(run_id.as_str())
        .bind(stream)
        .bind(i64::try_from(from).unwrap_or(i64::MAX))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StreamChunk {
                index: u64::try_from(r.chunk_index).unwrap_or_default(),
                chunk: r.chunk,
            })
            .collect())
    }
}

/// Escape `LIKE` metacharacters so queue prefixes match literally.
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
