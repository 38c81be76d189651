mod common;

use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use queen_loop::net::TcpListener;
use queen_loop::SelectorLoop;

use common::RecordingManager;

/// Stopping a loop with a live connection must close that connection and
/// return within the configured stop budget.
#[test]
fn stop_closes_outstanding_endpoint_within_budget() {
    common::init_logging();
    let manager = RecordingManager::new(Duration::from_secs(5));
    let selector_loop = SelectorLoop::with_stop_timeout(manager.clone(), Duration::from_millis(200)).unwrap();
    manager.attach(selector_loop.clone());
    selector_loop.start().unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let listener = TcpListener::new(listener).unwrap();
    selector_loop.submit_acceptor(listener).unwrap();

    let _client = StdTcpStream::connect(addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while manager.events.lock().unwrap().iter().all(|e| *e != "connection_opened") && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    let started = Instant::now();
    let stopped = selector_loop.stop().unwrap();
    assert!(stopped);
    assert!(started.elapsed() <= Duration::from_millis(250));
    assert!(manager.last_connection_closed.load(Ordering::SeqCst));
}
