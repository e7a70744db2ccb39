//! Replay task
//!
//! Runs a backend's replay on its own thread and records how it ended. The
//! outcome is published before the events stream disconnects, so once a
//! consumer has seen the end of the stream the outcome is already known.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use crate::error::{LogError, Result};
use super::{Event, QUEUE_CAPACITY};

/// A replay in progress, or finished and not yet collected
pub(crate) struct ReplayTask<T> {
    handle: JoinHandle<()>,

    /// `Some` after a clean replay, `None` after a failed one
    outcome: Receiver<Option<T>>,

    /// Outcome once received
    finished: Option<Option<T>>,
}

impl<T: Copy + Send + 'static> ReplayTask<T> {
    /// Spawn `body` with the sending side of a fresh events stream.
    pub fn spawn<F>(name: &str, body: F) -> Result<(Self, Receiver<Event>)>
    where
        F: FnOnce(&Sender<Event>) -> Option<T> + Send + 'static,
    {
        let (events_tx, events_rx) = channel::bounded(QUEUE_CAPACITY);
        let (outcome_tx, outcome_rx) = channel::bounded(1);

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let outcome = body(&events_tx);
            let _ = outcome_tx.send(outcome);
            // Consumers see the end of the stream only after this point.
            drop(events_tx);
        })?;

        Ok((
            Self {
                handle,
                outcome: outcome_rx,
                finished: None,
            },
            events_rx,
        ))
    }

    /// How the replay ended, without waiting for it.
    ///
    /// Fails with `InvalidState` while events are still being streamed.
    pub fn outcome(&mut self) -> Result<Option<T>> {
        if self.finished.is_none() {
            let outcome = match self.outcome.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => {
                    return Err(LogError::InvalidState("replay stream not drained".into()))
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(LogError::InvalidState("replay thread panicked".into()))
                }
            };
            self.finished = Some(outcome);
        }
        Ok(self.finished.flatten())
    }

    /// Wait for the thread to exit. Only call after `outcome` succeeded.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}
