//! Tests for the PostgreSQL backend
//!
//! Most of these need a reachable server and are ignored by default. Run with
//! `cargo test -- --ignored` after setting:
//! - KVTXLOG_TEST_PG_HOST (default localhost)
//! - KVTXLOG_TEST_PG_PORT (default 5432)
//! - KVTXLOG_TEST_PG_DATABASE (default kvtxlog_test)
//! - KVTXLOG_TEST_PG_USER (default postgres)
//! - KVTXLOG_TEST_PG_PASSWORD (default empty)
//!
//! The tests share the `transactions` table, so they only compare events they
//! wrote themselves.

use std::env;

use kvtxlog::config::PostgresParams;
use kvtxlog::txlog::{Event, LogState, Operation, PostgresTransactionLog, TransactionLog};
use kvtxlog::LogError;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_params() -> PostgresParams {
    let var = |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());
    let port = var("KVTXLOG_TEST_PG_PORT", "5432").parse().unwrap();

    PostgresParams::new(
        var("KVTXLOG_TEST_PG_DATABASE", "kvtxlog_test"),
        var("KVTXLOG_TEST_PG_HOST", "localhost"),
        var("KVTXLOG_TEST_PG_USER", "postgres"),
        var("KVTXLOG_TEST_PG_PASSWORD", ""),
    )
    .with_port(port)
}

fn replay_all() -> Vec<Event> {
    let log = PostgresTransactionLog::connect(&test_params()).unwrap();
    let events = log.read_events().unwrap().collect_all().unwrap();
    log.close().unwrap();
    events
}

/// Unique key prefix so concurrent test runs don't see each other's rows
fn unique_prefix(test: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}-{}-", test, nanos)
}

fn with_prefix<'a>(events: &'a [Event], prefix: &'a str) -> impl Iterator<Item = &'a Event> {
    events
        .iter()
        .filter(move |e| e.operation.key().starts_with(prefix.as_bytes()))
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_connect_refused_is_connection_error() {
    // Nothing listens on port 1
    let params = PostgresParams::new("kvtxlog", "127.0.0.1", "postgres", "").with_port(1);

    match PostgresTransactionLog::connect(&params) {
        Err(LogError::Connection(_)) => {}
        Err(other) => panic!("expected connection error, got {}", other),
        Ok(_) => panic!("connected to a closed port"),
    }
}

#[test]
#[ignore]
fn test_connect_twice_keeps_table() {
    let first = PostgresTransactionLog::connect(&test_params()).unwrap();
    first.close().unwrap();

    // Schema setup must be idempotent
    let second = PostgresTransactionLog::connect(&test_params()).unwrap();
    assert_eq!(second.state(), LogState::Created);
    second.close().unwrap();
}

// =============================================================================
// Write / Replay Tests
// =============================================================================

#[test]
#[ignore]
fn test_put_put_delete_roundtrip() {
    let prefix = unique_prefix("ppd");
    let a = format!("{}a", prefix).into_bytes();
    let b = format!("{}b", prefix).into_bytes();

    let log = PostgresTransactionLog::connect(&test_params()).unwrap();
    log.read_events().unwrap().collect_all().unwrap();
    log.run().unwrap();
    log.write_put(&a, b"1").unwrap();
    log.write_put(&b, b"2").unwrap();
    log.write_delete(&a).unwrap();
    log.close().unwrap();

    let events = replay_all();
    let ours: Vec<&Event> = with_prefix(&events, &prefix).collect();
    assert_eq!(ours.len(), 3);
    assert_eq!(ours[0].operation, Operation::Put { key: a.clone(), value: b"1".to_vec() });
    assert_eq!(ours[1].operation, Operation::Put { key: b, value: b"2".to_vec() });
    assert_eq!(ours[2].operation, Operation::Delete { key: a });
    assert!(ours[0].sequence < ours[1].sequence && ours[1].sequence < ours[2].sequence);
}

#[test]
#[ignore]
fn test_empty_value_and_binary_key() {
    let prefix = unique_prefix("bin");
    let key = format!("{}\t\n\u{0}", prefix).into_bytes();

    let log = PostgresTransactionLog::connect(&test_params()).unwrap();
    log.run().unwrap();
    log.write_put(&key, b"").unwrap();
    log.close().unwrap();

    let events = replay_all();
    let ours: Vec<&Event> = with_prefix(&events, &prefix).collect();
    assert_eq!(ours.len(), 1);
    assert_eq!(ours[0].operation.value(), Some(&b""[..]));
}

#[test]
#[ignore]
fn test_replay_is_strictly_ordered() {
    let events = replay_all();
    for pair in events.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
    }
}

#[test]
#[ignore]
fn test_write_before_run_is_rejected() {
    let log = PostgresTransactionLog::connect(&test_params()).unwrap();
    assert!(matches!(log.write_put(b"k", b"v"), Err(LogError::InvalidState(_))));
    log.close().unwrap();
}
