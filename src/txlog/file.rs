//! File backend
//!
//! Persists events as tab-separated text lines in an append-only file.
//!
//! ## File Format
//! ```text
//! <sequence>\t<kind>\t<hex(key)>\t<hex(value)>\n
//! ```
//! One line per event, kind 1 = Put, 2 = Delete. The value field is always
//! present and empty for a Delete. Sequence numbers are assigned here, by the
//! writer thread, continuing from the highest sequence found on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;

use crate::config::SyncPolicy;
use crate::error::{LogError, Result};
use super::replay::ReplayTask;
use super::writer::{WriterChannels, WriterQueue};
use super::{Event, LogState, Operation, Replay, SequenceCheck, TransactionLog};

/// Transaction log stored in a single append-only file
pub struct FileTransactionLog {
    /// Location of the log file
    path: PathBuf,

    /// How often the writer fsyncs
    sync_policy: SyncPolicy,

    /// Open handle (read + append). Moved into the writer thread by `run()`.
    file: Mutex<Option<File>>,

    /// Lifecycle state
    state: Mutex<LogState>,

    /// Replay thread; yields the last sequence read, or `None` if replay failed
    replay: Mutex<Option<ReplayTask<u64>>>,

    /// Producer side of the writer thread
    queue: WriterQueue,
}

impl FileTransactionLog {
    /// Open or create the log file at `path`
    pub fn open(path: impl AsRef<Path>, sync_policy: SyncPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        tracing::info!("Opened transaction log file {}", path.display());

        Ok(Self {
            path,
            sync_policy,
            file: Mutex::new(Some(file)),
            state: Mutex::new(LogState::Created),
            replay: Mutex::new(None),
            queue: WriterQueue::new(),
        })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh read handle positioned at the start of the file
    fn reader(&self) -> Result<BufReader<File>> {
        let guard = self.file.lock();
        let file = guard
            .as_ref()
            .ok_or_else(|| LogError::InvalidState("log file is no longer open".into()))?;

        // Shares the offset with the append handle; appends ignore it.
        let mut reader = file.try_clone()?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(BufReader::new(reader))
    }

    /// Highest sequence the writer must continue from
    fn starting_sequence(&self, state: LogState) -> Result<u64> {
        if state == LogState::Replaying {
            let mut replay = self.replay.lock();
            let task = replay
                .as_mut()
                .ok_or_else(|| LogError::InvalidState("no replay in progress".into()))?;

            // Never block here: an undrained replay would never finish.
            let last = task.outcome()?.ok_or_else(|| {
                LogError::InvalidState("replay failed; refusing to append to this log".into())
            })?;
            if let Some(task) = replay.take() {
                task.join();
            }
            return Ok(last);
        }

        // No replay was requested: find where the file ends ourselves.
        scan_lines(self.reader()?, |_| true)
    }
}

impl TransactionLog for FileTransactionLog {
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

        let last_sequence = self.starting_sequence(*state)?;
        let file = self
            .file
            .lock()
            .take()
            .ok_or_else(|| LogError::InvalidState("log file is no longer open".into()))?;
        let sync_policy = self.sync_policy;

        self.queue.start("kvtxlog-file-writer", move |channels| {
            write_loop(file, last_sequence, sync_policy, channels)
        })?;

        *state = LogState::Live;
        tracing::info!(
            "File transaction log live at {}, last sequence {}",
            self.path.display(),
            last_sequence
        );
        Ok(())
    }

    fn read_events(&self) -> Result<Replay> {
        let mut state = self.state.lock();
        if *state != LogState::Created {
            return Err(LogError::InvalidState(format!("cannot replay a log in state {:?}", *state)));
        }

        let reader = self.reader()?;
        let (errors_tx, errors_rx) = channel::bounded(1);

        let (task, events_rx) = ReplayTask::spawn("kvtxlog-file-replay", move |events_tx| {
            match scan_lines(reader, |event| events_tx.send(event).is_ok()) {
                Ok(last) => {
                    tracing::debug!("File replay finished, last sequence {}", last);
                    Some(last)
                }
                Err(e) => {
                    tracing::warn!("File replay failed: {}", e);
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

        // Not needed any more; the thread ends once its receiver is gone.
        drop(self.replay.lock().take());
        if let Some(file) = self.file.lock().take() {
            file.sync_all()?;
        }

        *state = LogState::Closed;
        tracing::info!("Closed transaction log file {}", self.path.display());
        Ok(())
    }

    fn state(&self) -> LogState {
        *self.state.lock()
    }
}

impl Drop for FileTransactionLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Error closing transaction log {}: {}", self.path.display(), e);
        }
    }
}

/// Read every line from `reader`, validating order, and hand each event to
/// `on_event` until it returns `false`.
///
/// Returns the highest sequence read (0 for an empty file).
fn scan_lines<R: BufRead>(mut reader: R, mut on_event: impl FnMut(Event) -> bool) -> Result<u64> {
    let mut check = SequenceCheck::new();
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(check.last());
        }
        line_no += 1;

        let line = std::str::from_utf8(&buf).map_err(|_| LogError::Parse {
            line: line_no,
            reason: "line is not valid UTF-8".into(),
        })?;
        let event = Event::decode_line(line, line_no)?;
        check.observe(event.sequence)?;

        tracing::trace!("Replayed event {} ({:?})", event.sequence, event.kind());
        if !on_event(event) {
            return Err(LogError::InvalidState("replay consumer went away".into()));
        }
    }
}

/// Body of the writer thread
fn write_loop(mut file: File, mut sequence: u64, sync_policy: SyncPolicy, channels: WriterChannels) {
    let mut written = 0u64;
    let mut unsynced = false;

    while let Ok(operation) = channels.operations.recv() {
        sequence = match sequence.checked_add(1) {
            Some(next) => next,
            None => {
                channels.fail(LogError::SequenceExhausted { last: sequence });
                return;
            }
        };
        let line = Event::new(sequence, operation).encode_line();

        // One write per line so a record never interleaves with another.
        if let Err(e) = file.write_all(line.as_bytes()) {
            channels.fail(e.into());
            return;
        }
        written += 1;

        if sync_policy.should_sync(written) {
            if let Err(e) = file.sync_data() {
                channels.fail(e.into());
                return;
            }
            unsynced = false;
        } else {
            unsynced = true;
        }
    }

    // Queue closed: everything enqueued before close() is now written.
    if unsynced {
        if let Err(e) = file.sync_all() {
            channels.fail(e.into());
            return;
        }
    }
    tracing::debug!("File writer drained after {} events, last sequence {}", written, sequence);
}
