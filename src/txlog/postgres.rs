//! PostgreSQL backend
//!
//! Persists events as rows of a `transactions` table. The database assigns
//! sequence numbers (`BIGSERIAL`), so no counter is kept here; ordering on
//! replay comes from `ORDER BY sequence`.
//!
//! Keys and values are stored hex-encoded so arbitrary bytes fit the TEXT
//! columns. `value` is NULL for a Delete and `''` for an empty Put.
//!
//! sqlx is async; the backend owns a small Tokio runtime and its writer and
//! replay threads drive queries with `block_on`, keeping the contract blocking.
//! Construct and drop this type outside of any async context.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver};
use futures::TryStreamExt;
use parking_lot::Mutex;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Connection;
use tokio::runtime::Runtime;

use crate::config::PostgresParams;
use crate::error::{LogError, Result};
use super::replay::ReplayTask;
use super::writer::WriterQueue;
use super::{Event, EventKind, LogState, Operation, Replay, TransactionLog};

/// Construction gives up on an unreachable server after this long
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const TABLE_EXISTS_QUERY: &str = "SELECT to_regclass('public.transactions')::text";

const CREATE_TABLE_QUERY: &str = "
    CREATE TABLE transactions (
        sequence   BIGSERIAL PRIMARY KEY,
        event_type SMALLINT NOT NULL,
        key        TEXT NOT NULL,
        value      TEXT
    )";

const INSERT_QUERY: &str = "INSERT INTO transactions (event_type, key, value) VALUES ($1, $2, $3)";

const REPLAY_QUERY: &str = "SELECT sequence, event_type, key, value FROM transactions ORDER BY sequence";

/// Transaction log stored in a PostgreSQL table
pub struct PostgresTransactionLog {
    /// Runtime hosting the connection's I/O
    runtime: Arc<Runtime>,

    /// Pool capped at one connection: the single dedicated writer connection
    pool: PgPool,

    /// Lifecycle state
    state: Mutex<LogState>,

    /// Replay thread; yields the number of rows read, or `None` if replay failed
    replay: Mutex<Option<ReplayTask<u64>>>,

    /// Producer side of the writer thread
    queue: WriterQueue,
}

impl PostgresTransactionLog {
    /// Connect, verify the connection and make sure the table exists.
    pub fn connect(params: &PostgresParams) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("kvtxlog-pg-io")
            .enable_all()
            .build()?;

        let options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.database)
            .username(&params.user)
            .password(&params.password);

        tracing::info!(
            "Connecting to PostgreSQL at {}:{} (database {})",
            params.host,
            params.port,
            params.database
        );

        let pool = runtime.block_on(async {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect_with(options)
                .await
                .map_err(|e| LogError::Connection(e.to_string()))?;

            let mut conn = pool
                .acquire()
                .await
                .map_err(|e| LogError::Connection(e.to_string()))?;
            conn.ping()
                .await
                .map_err(|e| LogError::Connection(e.to_string()))?;
            drop(conn);

            Ok::<_, LogError>(pool)
        })?;

        let log = Self {
            runtime: Arc::new(runtime),
            pool,
            state: Mutex::new(LogState::Created),
            replay: Mutex::new(None),
            queue: WriterQueue::new(),
        };
        log.ensure_table()?;

        Ok(log)
    }

    /// Create the `transactions` table unless it is already there
    fn ensure_table(&self) -> Result<()> {
        self.runtime.block_on(async {
            let existing: Option<String> = sqlx::query_scalar(TABLE_EXISTS_QUERY)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| LogError::Database(format!("failed to verify table exists: {}", e)))?;

            if existing.is_some() {
                tracing::debug!("Table transactions already exists");
                return Ok::<(), LogError>(());
            }

            sqlx::query(CREATE_TABLE_QUERY)
                .execute(&self.pool)
                .await
                .map_err(|e| LogError::Database(format!("failed to create table: {}", e)))?;
            tracing::info!("Created table transactions");
            Ok::<(), LogError>(())
        })
    }
}

impl TransactionLog for PostgresTransactionLog {
    fn write_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.queue.enqueue(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn write_delete(&self, key: &[u8]) -> Result<()> {
        self.queue.enqueue(Operation::Delete { key: key.to_vec() })
    }

    fn run(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !matches!(*state, LogState::Created | LogState::Replaying) {
            return Err(LogError::InvalidState(format!("cannot run a log in state {:?}", *state)));
        }

        if *state == LogState::Replaying {
            let mut replay = self.replay.lock();
            if let Some(task) = replay.as_mut() {
                task.outcome()?.ok_or_else(|| {
                    LogError::InvalidState("replay failed; refusing to append to this log".into())
                })?;
            }
            if let Some(task) = replay.take() {
                task.join();
            }
        }

        let runtime = Arc::clone(&self.runtime);
        let pool = self.pool.clone();

        self.queue.start("kvtxlog-pg-writer", move |channels| {
            let mut written = 0u64;
            while let Ok(operation) = channels.operations.recv() {
                if let Err(e) = runtime.block_on(insert_event(&pool, &operation)) {
                    channels.fail(e);
                    return;
                }
                written += 1;
            }
            tracing::debug!("PostgreSQL writer drained after {} events", written);
        })?;

        *state = LogState::Live;
        tracing::info!("PostgreSQL transaction log live");
        Ok(())
    }

    fn read_events(&self) -> Result<Replay> {
        let mut state = self.state.lock();
        if *state != LogState::Created {
            return Err(LogError::InvalidState(format!("cannot replay a log in state {:?}", *state)));
        }

        let (errors_tx, errors_rx) = channel::bounded(1);
        let runtime = Arc::clone(&self.runtime);
        let pool = self.pool.clone();

        let (task, events_rx) = ReplayTask::spawn("kvtxlog-pg-replay", move |events_tx| {
            let result = runtime.block_on(async {
                let mut rows = sqlx::query_as::<_, (i64, i16, String, Option<String>)>(REPLAY_QUERY)
                    .fetch(&pool);
                let mut row_no = 0u64;

                while let Some((sequence, event_type, key, value)) = rows
                    .try_next()
                    .await
                    .map_err(|e| LogError::Database(format!("error reading row: {}", e)))?
                {
                    row_no += 1;
                    let event = decode_row(row_no, sequence, event_type, &key, value.as_deref())?;
                    if events_tx.send(event).is_err() {
                        return Err(LogError::InvalidState("replay consumer went away".into()));
                    }
                }

                Ok::<_, LogError>(row_no)
            });

            match result {
                Ok(rows) => {
                    tracing::debug!("PostgreSQL replay finished after {} rows", rows);
                    Some(rows)
                }
                Err(e) => {
                    tracing::warn!("PostgreSQL replay failed: {}", e);
                    let _ = errors_tx.send(e);
                    None
                }
            }
        })?;

        *self.replay.lock() = Some(task);
        *state = LogState::Replaying;

        Ok(Replay {
            events: events_rx,
            errors: errors_rx,
        })
    }

    fn errors(&self) -> Receiver<LogError> {
        self.queue.errors()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == LogState::Closed {
            return Ok(());
        }

        self.queue.shutdown()?;
        drop(self.replay.lock().take());
        self.runtime.block_on(self.pool.close());

        *state = LogState::Closed;
        tracing::info!("Closed PostgreSQL transaction log");
        Ok(())
    }

    fn state(&self) -> LogState {
        *self.state.lock()
    }
}

impl Drop for PostgresTransactionLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Error closing PostgreSQL transaction log: {}", e);
        }
    }
}

async fn insert_event(pool: &PgPool, operation: &Operation) -> Result<()> {
    let (key, value) = encode_row(operation);
    sqlx::query(INSERT_QUERY)
        .bind(operation.kind().code() as i16)
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

/// Column values for `key` and `value`
fn encode_row(operation: &Operation) -> (String, Option<String>) {
    (
        hex::encode(operation.key()),
        operation.value().map(hex::encode),
    )
}

/// Turn one selected row back into an event
fn decode_row(row_no: u64, sequence: i64, event_type: i16, key: &str, value: Option<&str>) -> Result<Event> {
    let parse_err = |reason: String| LogError::Parse { line: row_no, reason };

    let sequence = u64::try_from(sequence)
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| parse_err(format!("bad sequence {}", sequence)))?;
    let kind = u8::try_from(event_type)
        .ok()
        .and_then(EventKind::from_code)
        .ok_or_else(|| parse_err(format!("unknown event type {}", event_type)))?;
    let key = hex::decode(key).map_err(|e| parse_err(format!("bad key encoding: {}", e)))?;
    let value = value
        .map(hex::decode)
        .transpose()
        .map_err(|e| parse_err(format!("bad value encoding: {}", e)))?;

    let operation = Operation::from_parts(kind, key, value).map_err(parse_err)?;
    Ok(Event::new(sequence, operation))
}
