mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use queen_loop::{Change, SelectorLoop};

use common::RecordingManager;

/// A change submitted into an idle loop (no registered channels, so the
/// wait blocks indefinitely) must still be observed quickly — the waker is
/// what breaks it out of `epoll_wait`.
#[test]
fn submit_while_selecting_is_observed_quickly() {
    common::init_logging();
    let manager = RecordingManager::new(Duration::from_secs(5));
    let selector_loop = SelectorLoop::new(manager.clone()).unwrap();
    manager.attach(selector_loop.clone());
    selector_loop.start().unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let flag_for_change = flag.clone();

    selector_loop
        .submit(Change::User(Box::new(move |_loop_ref| {
            flag_for_change.store(true, Ordering::SeqCst);
        })))
        .unwrap();

    let deadline = Instant::now() + Duration::from_millis(100);
    while !flag.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::yield_now();
    }

    assert!(flag.load(Ordering::SeqCst), "change was not observed within 100ms");

    selector_loop.stop().unwrap();
}
