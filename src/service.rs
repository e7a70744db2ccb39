//! Service Module
//!
//! The request-side facade: an in-memory store kept durable by a
//! transaction log.
//!
//! ## Responsibilities
//! - Build the configured log backend and recover the store from it
//! - Route Get/Put/Delete to the store and the log
//! - Keep watching the log for writer failures
//! - Close the log on shutdown

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{LogError, Result};
use crate::recovery::{Coordinator, ErrorMonitor, RecoveryReport};
use crate::store::{KeyValueStore, MemoryStore};
use crate::txlog::{self, TransactionLog};

/// A key-value store whose mutations go through a transaction log
///
/// ## Concurrency Model
///
/// - **Writes** (put/delete): serialized by `write_lock`, so the order events
///   reach the log is the order they are applied to the store. Without it two
///   puts to one key could land in the log and the map in opposite orders and
///   a replay would disagree with what was served.
/// - **Reads** (get): go straight to the store (internal RwLock)
pub struct KvService {
    /// Current state, rebuilt from the log on open
    store: MemoryStore,

    /// Durable record of every mutation
    log: Arc<dyn TransactionLog>,

    /// Watches the log's writer errors
    monitor: ErrorMonitor,

    /// What recovery found on open
    report: RecoveryReport,

    /// Serializes write operations (put/delete)
    write_lock: Mutex<()>,
}

impl KvService {
    /// Open the log described by `config` and recover the store from it
    pub fn open(config: &Config) -> Result<Self> {
        let log = txlog::open_log(config)?;
        Self::with_log(log)
    }

    /// Recover a fresh store from an already constructed log.
    ///
    /// The log must not have been replayed or started yet.
    pub fn with_log(log: Arc<dyn TransactionLog>) -> Result<Self> {
        let store = MemoryStore::new();

        let (report, monitor) = Coordinator::new(log.as_ref(), &store).recover_and_monitor(|_| {})?;

        Ok(Self {
            store,
            log,
            monitor,
            report,
            write_lock: Mutex::new(()),
        })
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.store.get(key)
    }

    /// Put a key-value pair
    ///
    /// The event is queued before the store is touched, so a write the log
    /// refused is never visible.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        self.log.write_put(key, value)?;
        self.store.put(key, value)
    }

    /// Delete a key
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        self.log.write_delete(key)?;
        self.store.delete(key)
    }

    /// Close the log gracefully
    ///
    /// Waits for every queued event to be written, then for the error
    /// monitor to wind down. Returns the writer's failure if there was one.
    pub fn close(self) -> Result<()> {
        self.log.close()?;

        match self.monitor.join() {
            Some(message) => Err(LogError::WriterFailed(message)),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Whether the log writer is still persisting writes
    pub fn is_healthy(&self) -> bool {
        self.monitor.is_healthy()
    }

    /// First writer failure reported by the log, if any
    pub fn first_error(&self) -> Option<String> {
        self.monitor.first_error()
    }

    /// What recovery found on open
    pub fn recovery_report(&self) -> RecoveryReport {
        self.report
    }

    /// The recovered store
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// The underlying log
    pub fn log(&self) -> &Arc<dyn TransactionLog> {
        &self.log
    }
}
