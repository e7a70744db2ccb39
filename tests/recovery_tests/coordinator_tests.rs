//! Tests for the recovery coordinator
//!
//! These tests verify:
//! - Replayed state matches what was written
//! - Present-but-empty values survive replay
//! - Replay errors abort recovery and leave the log un-started
//! - Store errors abort recovery too

use std::fs;
use std::path::{Path, PathBuf};

use kvtxlog::config::SyncPolicy;
use kvtxlog::txlog::{FileTransactionLog, LogState, TransactionLog};
use kvtxlog::{Coordinator, KeyValueStore, LogError, MemoryStore, RecoveryReport};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_log() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("transaction.log");
    (temp_dir, log_path)
}

fn open_log(path: &Path) -> FileTransactionLog {
    FileTransactionLog::open(path, SyncPolicy::EveryWrite).unwrap()
}

/// Store that refuses to write one particular key
struct FailingStore {
    inner: MemoryStore,
    poisoned_key: Vec<u8>,
}

impl KeyValueStore for FailingStore {
    fn get(&self, key: &[u8]) -> kvtxlog::Result<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> kvtxlog::Result<()> {
        if key == self.poisoned_key.as_slice() {
            return Err(LogError::Store("disk quota exceeded".into()));
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> kvtxlog::Result<()> {
        self.inner.delete(key)
    }
}

// =============================================================================
// Successful Recovery Tests
// =============================================================================

#[test]
fn test_recover_empty_log() {
    let (_temp, log_path) = setup_temp_log();
    let log = open_log(&log_path);
    let store = MemoryStore::new();

    let report = Coordinator::new(&log, &store).recover().unwrap();

    assert_eq!(report, RecoveryReport::default());
    assert!(store.is_empty());
    assert_eq!(log.state(), LogState::Live);
    log.close().unwrap();
}

#[test]
fn test_recover_put_put_delete() {
    let (_temp, log_path) = setup_temp_log();

    {
        let log = open_log(&log_path);
        Coordinator::new(&log, &MemoryStore::new()).recover().unwrap();
        log.write_put(b"a", b"1").unwrap();
        log.write_put(b"b", b"2").unwrap();
        log.write_delete(b"a").unwrap();
        log.close().unwrap();
    }

    let log = open_log(&log_path);
    let store = MemoryStore::new();
    let report = Coordinator::new(&log, &store).recover().unwrap();

    assert_eq!(
        report,
        RecoveryReport {
            events_applied: 3,
            puts: 2,
            deletes: 1,
            last_sequence: 3,
        }
    );
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(b"b").unwrap(), b"2".to_vec());
    assert!(matches!(store.get(b"a"), Err(LogError::NoSuchKey)));
    log.close().unwrap();
}

#[test]
fn test_recover_empty_value_is_present() {
    let (_temp, log_path) = setup_temp_log();
    fs::write(&log_path, "1\t1\t78\t\n").unwrap();

    let log = open_log(&log_path);
    let store = MemoryStore::new();
    Coordinator::new(&log, &store).recover().unwrap();

    assert_eq!(store.get(b"x").unwrap(), Vec::<u8>::new());
    log.close().unwrap();
}

#[test]
fn test_recover_delete_of_missing_key_is_fine() {
    let (_temp, log_path) = setup_temp_log();
    fs::write(&log_path, "1\t2\t61\t\n").unwrap();

    let log = open_log(&log_path);
    let store = MemoryStore::new();
    let report = Coordinator::new(&log, &store).recover().unwrap();

    assert_eq!(report.deletes, 1);
    assert!(store.is_empty());
    log.close().unwrap();
}

#[test]
fn test_recovered_log_accepts_writes() {
    let (_temp, log_path) = setup_temp_log();
    fs::write(&log_path, "1\t1\t61\t31\n").unwrap();

    let log = open_log(&log_path);
    Coordinator::new(&log, &MemoryStore::new()).recover().unwrap();
    log.write_put(b"b", b"2").unwrap();
    log.close().unwrap();

    let contents = fs::read_to_string(&log_path).unwrap();
    assert_eq!(contents, "1\t1\t61\t31\n2\t1\t62\t32\n");
}

// =============================================================================
// Failed Recovery Tests
// =============================================================================

#[test]
fn test_sequence_violation_aborts_recovery() {
    let (_temp, log_path) = setup_temp_log();
    fs::write(&log_path, "1\t1\t61\t31\n2\t1\t62\t32\n2\t1\t63\t33\n3\t1\t64\t34\n").unwrap();

    let log = open_log(&log_path);
    let store = MemoryStore::new();
    let err = Coordinator::new(&log, &store).recover().unwrap_err();

    assert!(matches!(err, LogError::SequenceViolation { previous: 2, found: 2 }));
    // Nothing after the violation was applied. Events before it may or may
    // not be, depending on which stream the coordinator saw first.
    assert!(store.len() <= 2);
    assert!(store.get(b"c").is_err());
    assert!(store.get(b"d").is_err());
    // Never went live
    assert_eq!(log.state(), LogState::Replaying);
    assert!(matches!(log.write_put(b"e", b"5"), Err(LogError::InvalidState(_))));
}

#[test]
fn test_parse_failure_aborts_recovery() {
    let (_temp, log_path) = setup_temp_log();
    fs::write(&log_path, "1\t1\t61\t31\n2\t1\t62\n").unwrap();

    let log = open_log(&log_path);
    let store = MemoryStore::new();
    let err = Coordinator::new(&log, &store).recover().unwrap_err();

    assert!(err.is_corruption());
    assert_eq!(log.state(), LogState::Replaying);
}

#[test]
fn test_store_failure_aborts_recovery() {
    let (_temp, log_path) = setup_temp_log();
    // a=1, bad=2, c=3
    fs::write(&log_path, "1\t1\t61\t31\n2\t1\t626164\t32\n3\t1\t63\t33\n").unwrap();

    let log = open_log(&log_path);
    let store = FailingStore {
        inner: MemoryStore::new(),
        poisoned_key: b"bad".to_vec(),
    };
    let err = Coordinator::new(&log, &store).recover().unwrap_err();

    assert!(matches!(err, LogError::Store(_)));
    assert_eq!(store.inner.len(), 1);
    assert_ne!(log.state(), LogState::Live);
}

#[test]
fn test_recover_twice_is_rejected() {
    let (_temp, log_path) = setup_temp_log();
    let log = open_log(&log_path);
    let store = MemoryStore::new();

    Coordinator::new(&log, &store).recover().unwrap();
    assert!(matches!(
        Coordinator::new(&log, &store).recover(),
        Err(LogError::InvalidState(_))
    ));
    log.close().unwrap();
}
