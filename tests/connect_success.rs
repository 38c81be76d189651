mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use queen_loop::SelectorLoop;

use common::RecordingManager;

/// A connect that completes before its timeout fires must build an
/// endpoint and must never report a failure for it.
#[test]
fn connect_success_cancels_timeout_and_builds_endpoint() {
    common::init_logging();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_thread = std::thread::spawn(move || listener.accept());

    let manager = RecordingManager::new(Duration::from_millis(300));
    let selector_loop = SelectorLoop::new(manager.clone()).unwrap();
    manager.attach(selector_loop.clone());
    selector_loop.start().unwrap();

    selector_loop.connect(&addr, Arc::new(())).unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while manager.events.lock().unwrap().iter().all(|e| *e != "new_endpoint") && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(manager.events.lock().unwrap().iter().any(|e| *e == "new_endpoint"));

    std::thread::sleep(Duration::from_millis(400));
    assert!(
        manager.connection_failed.lock().unwrap().is_empty(),
        "timeout fired despite successful connect"
    );

    accept_thread.join().unwrap().unwrap();
    selector_loop.stop().unwrap();
}
