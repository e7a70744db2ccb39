//! Writer queue
//!
//! The bounded channel between request-side producers and a backend's single
//! writer thread, plus the channel the writer reports its failure on.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::error::{LogError, Result};
use super::{Operation, QUEUE_CAPACITY};

/// Producer side of a backend's writer thread
pub(crate) struct WriterQueue {
    /// Present only while the log is live
    sender: RwLock<Option<Sender<Operation>>>,

    /// Writer thread, joined on shutdown
    handle: Mutex<Option<JoinHandle<()>>>,

    /// Writer failures; the writer sends at most one before exiting. The
    /// sender moves into the writer, so the stream disconnects when it ends.
    error_tx: Mutex<Option<Sender<LogError>>>,
    error_rx: Receiver<LogError>,
}

/// What a writer thread receives when it is started
pub(crate) struct WriterChannels {
    pub operations: Receiver<Operation>,
    pub errors: Sender<LogError>,
}

impl WriterChannels {
    /// Report the failure that is terminating the writer.
    ///
    /// The queue is closed first, so by the time the error is observable
    /// every further enqueue fails with `WriterStopped`.
    pub fn fail(self, error: LogError) {
        tracing::debug!("Transaction log writer stopping: {}", error);
        let WriterChannels { operations, errors } = self;
        drop(operations);
        // Capacity 1 and only ever one failure, so the slot is free.
        let _ = errors.try_send(error);
    }
}

impl WriterQueue {
    pub fn new() -> Self {
        let (error_tx, error_rx) = channel::bounded(1);
        Self {
            sender: RwLock::new(None),
            handle: Mutex::new(None),
            error_tx: Mutex::new(Some(error_tx)),
            error_rx,
        }
    }

    /// Spawn the writer thread. Fails if one was already started.
    pub fn start<F>(&self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(WriterChannels) + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(LogError::InvalidState("writer already started".into()));
        }

        let errors = self
            .error_tx
            .lock()
            .take()
            .ok_or_else(|| LogError::InvalidState("writer already started".into()))?;
        let (tx, rx) = channel::bounded(QUEUE_CAPACITY);
        let channels = WriterChannels {
            operations: rx,
            errors,
        };

        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(channels))?;

        *handle = Some(spawned);
        *self.sender.write() = Some(tx);
        Ok(())
    }

    /// Hand an operation to the writer, blocking while the queue is full
    pub fn enqueue(&self, operation: Operation) -> Result<()> {
        let sender = match &*self.sender.read() {
            Some(sender) => sender.clone(),
            None => return Err(LogError::InvalidState("log is not accepting writes".into())),
        };

        sender.send(operation).map_err(|_| LogError::WriterStopped)
    }

    /// Stop accepting writes and wait for the writer to drain the queue.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) -> Result<()> {
        // Dropping the last sender ends the writer's receive loop once the
        // queue is empty.
        self.sender.write().take();
        // Never started: disconnect the error stream ourselves.
        self.error_tx.lock().take();

        if let Some(handle) = self.handle.lock().take() {
            handle
                .join()
                .map_err(|_| LogError::InvalidState("writer thread panicked".into()))?;
        }
        Ok(())
    }

    pub fn errors(&self) -> Receiver<LogError> {
        self.error_rx.clone()
    }
}
