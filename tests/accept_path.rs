mod common;

use std::net::TcpStream as StdTcpStream;
use std::time::{Duration, Instant};

use queen_loop::net::TcpListener;
use queen_loop::SelectorLoop;

use common::RecordingManager;

/// A successful accept must call `new_endpoint` before `new_connection`,
/// and the key's attachment must end up live.
#[test]
fn accept_path_creates_endpoint_then_connection() {
    common::init_logging();
    let manager = RecordingManager::new(Duration::from_secs(5));
    let selector_loop = SelectorLoop::new(manager.clone()).unwrap();
    manager.attach(selector_loop.clone());
    selector_loop.start().unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let listener = TcpListener::new(listener).unwrap();
    selector_loop.submit_acceptor(listener).unwrap();

    let _client = StdTcpStream::connect(addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while manager.events.lock().unwrap().len() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    let events = manager.events.lock().unwrap().clone();
    let endpoint_pos = events
        .iter()
        .position(|e| *e == "new_endpoint")
        .expect("new_endpoint not called");
    let connection_pos = events
        .iter()
        .position(|e| *e == "new_connection")
        .expect("new_connection not called");
    assert!(endpoint_pos < connection_pos);

    selector_loop.stop().unwrap();
}
