//! Tests for the writer error monitor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel;
use kvtxlog::{ErrorMonitor, LogError};

#[test]
fn test_monitor_reports_first_failure() {
    let (tx, rx) = channel::bounded(1);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let monitor = ErrorMonitor::spawn(rx, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    tx.send(LogError::Io(std::io::Error::new(std::io::ErrorKind::Other, "no space left"))).unwrap();
    drop(tx);

    let first = monitor.join();
    assert!(first.unwrap().contains("no space left"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_monitor_healthy_without_failures() {
    let (tx, rx) = channel::bounded::<LogError>(1);

    let monitor = ErrorMonitor::spawn(rx, |_| {}).unwrap();
    assert!(monitor.is_healthy());
    assert_eq!(monitor.first_error(), None);

    drop(tx);
    assert_eq!(monitor.join(), None);
}
