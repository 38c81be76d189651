mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use queen_loop::{Change, SelectorLoop};

use common::RecordingManager;

/// A change whose execution panics must be caught and logged, not crash the
/// loop thread — a change submitted right after it must still run.
#[test]
fn faulting_change_does_not_stop_the_loop() {
    common::init_logging();
    let manager = RecordingManager::new(Duration::from_secs(5));
    let selector_loop = SelectorLoop::new(manager.clone()).unwrap();
    manager.attach(selector_loop.clone());
    selector_loop.start().unwrap();

    selector_loop
        .submit(Change::User(Box::new(|_loop_ref| {
            panic!("boom");
        })))
        .unwrap();

    let recovered = Arc::new(AtomicBool::new(false));
    let recovered_for_change = recovered.clone();
    selector_loop
        .submit(Change::User(Box::new(move |_loop_ref| {
            recovered_for_change.store(true, Ordering::SeqCst);
        })))
        .unwrap();

    let deadline = Instant::now() + Duration::from_millis(500);
    while !recovered.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(recovered.load(Ordering::SeqCst), "loop did not service the change after a prior panic");

    selector_loop.stop().unwrap();
}
