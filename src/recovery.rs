//! Recovery Module
//!
//! Rebuilds store state from a transaction log on startup and switches the
//! log into live mode.
//!
//! ## Startup protocol
//! 1. `read_events()` on the log
//! 2. Apply every replayed event to the store, strictly in order
//! 3. Stop on the first replay error or store error (startup must fail)
//! 4. Once both replay streams are closed, `run()` the log
//!
//! After step 4 the log's `errors()` stream must be watched; the writer stops
//! on its first failure and nothing else will notice. [`ErrorMonitor`] does
//! that watching.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;

use crate::error::{LogError, Result};
use crate::store::KeyValueStore;
use crate::txlog::{Event, Operation, TransactionLog};

/// Outcome of a successful recovery
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of events applied to the store
    pub events_applied: u64,

    /// Of which Puts
    pub puts: u64,

    /// Of which Deletes
    pub deletes: u64,

    /// Sequence of the last applied event (0 for an empty log)
    pub last_sequence: u64,
}

/// Drives replay of a log into a store.
///
/// Holds no state of its own besides the two references; events are only
/// held long enough to apply them.
pub struct Coordinator<'a> {
    log: &'a dyn TransactionLog,
    store: &'a dyn KeyValueStore,
}

impl<'a> Coordinator<'a> {
    pub fn new(log: &'a dyn TransactionLog, store: &'a dyn KeyValueStore) -> Self {
        Self { log, store }
    }

    /// Replay the whole log into the store, then start the log's writer.
    ///
    /// On error the log is left un-started and the store may hold a partial
    /// state that must not be served.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let replay = self.log.read_events()?;
        // Stands in for a stream once it has disconnected.
        let closed_events = channel::never::<Event>();
        let closed_errors = channel::never::<LogError>();
        let mut events_open = true;
        let mut errors_open = true;
        let mut report = RecoveryReport::default();

        while events_open || errors_open {
            let events = if events_open { &replay.events } else { &closed_events };
            let errors = if errors_open { &replay.errors } else { &closed_errors };

            crossbeam::select! {
                recv(events) -> msg => match msg {
                    Ok(event) => self.apply(event, &mut report)?,
                    Err(_) => events_open = false,
                },
                recv(errors) -> msg => match msg {
                    Ok(error) => {
                        tracing::error!(
                            "Replay failed after {} events: {}",
                            report.events_applied,
                            error
                        );
                        return Err(error);
                    }
                    Err(_) => errors_open = false,
                },
            }
        }

        tracing::info!(
            "Replayed {} events ({} puts, {} deletes), last sequence {}",
            report.events_applied,
            report.puts,
            report.deletes,
            report.last_sequence
        );

        self.log.run()?;
        Ok(report)
    }

    /// [`recover`](Self::recover), then start watching the log's writer errors.
    pub fn recover_and_monitor<F>(&self, on_error: F) -> Result<(RecoveryReport, ErrorMonitor)>
    where
        F: FnMut(&LogError) + Send + 'static,
    {
        let report = self.recover()?;
        let monitor = ErrorMonitor::spawn(self.log.errors(), on_error)?;
        Ok((report, monitor))
    }

    fn apply(&self, event: Event, report: &mut RecoveryReport) -> Result<()> {
        match &event.operation {
            Operation::Put { key, value } => {
                self.store.put(key, value)?;
                report.puts += 1;
            }
            Operation::Delete { key } => {
                self.store.delete(key)?;
                report.deletes += 1;
            }
        }

        report.events_applied += 1;
        report.last_sequence = event.sequence;
        tracing::trace!("Applied event {} ({:?})", event.sequence, event.kind());
        Ok(())
    }
}

/// Background watcher over a log's asynchronous error stream.
///
/// Each failure is logged and passed to the callback. The thread ends when
/// the stream disconnects, i.e. when the writer has exited.
pub struct ErrorMonitor {
    handle: Option<JoinHandle<()>>,
    first_error: Arc<Mutex<Option<String>>>,
}

impl ErrorMonitor {
    pub fn spawn<F>(errors: Receiver<LogError>, mut on_error: F) -> Result<Self>
    where
        F: FnMut(&LogError) + Send + 'static,
    {
        let first_error = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&first_error);

        let handle = thread::Builder::new()
            .name("kvtxlog-error-monitor".to_string())
            .spawn(move || {
                for error in errors.iter() {
                    tracing::error!("Transaction log failure: {}", error);
                    seen.lock().get_or_insert_with(|| error.to_string());
                    on_error(&error);
                }
            })?;

        Ok(Self {
            handle: Some(handle),
            first_error,
        })
    }

    /// Message of the first failure observed, if any
    pub fn first_error(&self) -> Option<String> {
        self.first_error.lock().clone()
    }

    /// True until the log has reported a failure
    pub fn is_healthy(&self) -> bool {
        self.first_error.lock().is_none()
    }

    /// Wait for the monitor to finish and return the first failure seen.
    ///
    /// Only returns once the log is closed or its writer has stopped.
    pub fn join(mut self) -> Option<String> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.first_error()
    }
}
