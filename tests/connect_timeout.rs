mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use queen_loop::{ConnectError, SelectorLoop};

use common::RecordingManager;

/// A connect to an address that never answers must fail with `Timeout`
/// exactly once, on schedule.
#[test]
fn connect_timeout_fires_exactly_once() {
    common::init_logging();
    let manager = RecordingManager::new(Duration::from_millis(50));
    let selector_loop = SelectorLoop::new(manager.clone()).unwrap();
    manager.attach(selector_loop.clone());
    selector_loop.start().unwrap();

    // Reserved, unroutable: the kernel never completes and never resets.
    let unroutable = "240.0.0.1:9".parse().unwrap();
    selector_loop.connect(&unroutable, Arc::new(())).unwrap();

    let deadline = Instant::now() + Duration::from_millis(500);
    while manager.connection_failed.lock().unwrap().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    let failures = manager.connection_failed.lock().unwrap();
    assert_eq!(failures.len(), 1, "connectionFailed should fire exactly once");
    assert!(matches!(failures[0], ConnectError::Timeout));

    drop(failures);
    selector_loop.stop().unwrap();
}
