//! Transaction Log Module
//!
//! Provides durability guarantees through an append-only log of mutations.
//!
//! ## Responsibilities
//! - Queue Put/Delete events from request handlers (bounded, blocking when full)
//! - Persist them in order from a single writer thread
//! - Replay the persisted events in sequence order on startup
//! - Report asynchronous writer failures
//!
//! ## Lifecycle
//! ```text
//! Created ──read_events()──► Replaying ──run()──► Live ──close()──► Closed
//!    │                                             ▲
//!    └──────────────────────run()──────────────────┘
//! ```
//! Replaying and Live never overlap: the replay stream must be drained before
//! `run()` is called.
//!
//! ## Backends
//! - [`FileTransactionLog`]: tab-separated text lines, local sequence counter
//! - [`PostgresTransactionLog`]: rows in a `transactions` table, `BIGSERIAL` sequence

mod event;
mod file;
mod postgres;
mod replay;
mod writer;

use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::config::{BackendConfig, Config};
use crate::error::{LogError, Result};

pub use event::{Event, EventKind, Operation, SequenceCheck, FIELD_DELIMITER};
pub use file::FileTransactionLog;
pub use postgres::PostgresTransactionLog;

/// Capacity of the queue between producers and the writer thread
pub const QUEUE_CAPACITY: usize = 16;

/// Where a log instance is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
    Created,
    Replaying,
    Live,
    Closed,
}

/// Contract shared by every persistence backend.
///
/// All methods take `&self` so one instance can be shared between the
/// coordinator and any number of producers.
pub trait TransactionLog: Send + Sync {
    /// Queue a Put. Blocks while the queue is full.
    fn write_put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Queue a Delete. Blocks while the queue is full.
    fn write_delete(&self, key: &[u8]) -> Result<()>;

    /// Start the single writer thread. Call at most once, after any replay
    /// stream has been drained.
    fn run(&self) -> Result<()>;

    /// Start a replay of everything persisted so far.
    fn read_events(&self) -> Result<Replay>;

    /// Failures of the writer thread after `run()`.
    ///
    /// The writer stops after its first failure, so any message here means
    /// the log no longer persists writes. Callers must watch this stream
    /// (see [`crate::recovery::ErrorMonitor`]).
    fn errors(&self) -> Receiver<LogError>;

    /// Wait until every event queued before the call is durable, then
    /// release the file or connection.
    fn close(&self) -> Result<()>;

    /// Current lifecycle state
    fn state(&self) -> LogState;
}

/// The two result streams of a replay.
///
/// `events` yields events in sequence order and closes at end of log or on
/// the first error; `errors` carries at most one terminal error.
pub struct Replay {
    pub events: Receiver<Event>,
    pub errors: Receiver<LogError>,
}

impl Replay {
    /// Drain the whole replay into memory, failing on the first error.
    ///
    /// Intended for tooling and tests; startup uses the coordinator.
    pub fn collect_all(self) -> Result<Vec<Event>> {
        let events: Vec<Event> = self.events.iter().collect();
        // The events channel only closes after the replay thread is done, so
        // any error has already been sent.
        match self.errors.try_recv() {
            Ok(error) => Err(error),
            Err(_) => Ok(events),
        }
    }
}

/// Build the backend selected by `config`.
pub fn open_log(config: &Config) -> Result<Arc<dyn TransactionLog>> {
    config.validate()?;

    match &config.backend {
        BackendConfig::File { path } => {
            let log = FileTransactionLog::open(path, config.sync_policy)?;
            Ok(Arc::new(log))
        }
        BackendConfig::Postgres(params) => {
            let log = PostgresTransactionLog::connect(params)?;
            Ok(Arc::new(log))
        }
    }
}
