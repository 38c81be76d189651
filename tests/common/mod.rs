//! A minimal `SelectorManager` shared by the integration tests: records the
//! callback order it receives instead of doing anything with it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use queen_loop::manager::SelectorManager;
use queen_loop::net::TcpStream;
use queen_loop::scheduler::{Scheduler, TimerScheduler};
use queen_loop::{Channel, Connection, ConnectError, EndPoint, Ready, SelectableEndPoint, SelectorLoop, Token, UserAttachment};

pub struct RecordingEndPoint {
    events: Arc<Mutex<Vec<&'static str>>>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl EndPoint for RecordingEndPoint {
    fn close(&self) {
        if let Some(connection) = self.connection.lock().unwrap().take() {
            connection.close();
        }
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.lock().unwrap().clone()
    }

    fn set_connection(&self, connection: Arc<dyn Connection>) {
        *self.connection.lock().unwrap() = Some(connection);
    }
}

impl SelectableEndPoint for RecordingEndPoint {
    fn on_selected(&self) {
        self.events.lock().unwrap().push("on_selected");
    }

    fn update_key(&self) {
        self.events.lock().unwrap().push("update_key");
    }

    fn interest(&self) -> Ready {
        Ready::readable()
    }
}

pub struct RecordingConnection {
    closed: Arc<AtomicBool>,
}

impl Connection for RecordingConnection {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Turns on the loop's debug/warn logging for test runs that want to see
/// it (`RUST_LOG=debug cargo test -- --nocapture`); a no-op past the first
/// call, so every test can call this unconditionally.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

pub struct RecordingManager {
    pub events: Arc<Mutex<Vec<&'static str>>>,
    pub connection_failed: Arc<Mutex<Vec<ConnectError>>>,
    pub last_connection_closed: Arc<AtomicBool>,
    loop_ref: Mutex<Option<Arc<SelectorLoop>>>,
    scheduler: Arc<dyn Scheduler>,
    connect_timeout: Duration,
}

impl RecordingManager {
    pub fn new(connect_timeout: Duration) -> Arc<RecordingManager> {
        Arc::new(RecordingManager {
            events: Arc::new(Mutex::new(Vec::new())),
            connection_failed: Arc::new(Mutex::new(Vec::new())),
            last_connection_closed: Arc::new(AtomicBool::new(false)),
            loop_ref: Mutex::new(None),
            scheduler: Arc::new(TimerScheduler::new()),
            connect_timeout,
        })
    }

    /// Closes the circular manager/loop dependency: the loop is only
    /// constructible with a manager already in hand, so the manager learns
    /// which loop to route `accepted()` channels back to after the fact.
    pub fn attach(&self, selector_loop: Arc<SelectorLoop>) {
        *self.loop_ref.lock().unwrap() = Some(selector_loop);
    }
}

impl SelectorManager for RecordingManager {
    fn new_endpoint(&self, _channel: &Channel, _selector_loop: Arc<SelectorLoop>, _token: Token) -> Arc<dyn SelectableEndPoint> {
        self.events.lock().unwrap().push("new_endpoint");
        Arc::new(RecordingEndPoint {
            events: self.events.clone(),
            connection: Mutex::new(None),
        })
    }

    fn new_connection(&self, _endpoint: &Arc<dyn SelectableEndPoint>, _attachment: UserAttachment) -> Arc<dyn Connection> {
        self.events.lock().unwrap().push("new_connection");
        Arc::new(RecordingConnection {
            closed: self.last_connection_closed.clone(),
        })
    }

    fn accepted(&self, channel: TcpStream) {
        if let Some(selector_loop) = self.loop_ref.lock().unwrap().as_ref() {
            let _ = selector_loop.submit_accept(channel, Arc::new(()));
        }
    }

    fn finish_connect(&self, channel: &TcpStream) -> bool {
        matches!(channel.take_error(), Ok(None))
    }

    fn endpoint_opened(&self, _endpoint: &Arc<dyn SelectableEndPoint>) {
        self.events.lock().unwrap().push("endpoint_opened");
    }

    fn endpoint_closed(&self, _endpoint: &Arc<dyn SelectableEndPoint>) {
        self.events.lock().unwrap().push("endpoint_closed");
    }

    fn connection_opened(&self, _connection: &Arc<dyn Connection>) {
        self.events.lock().unwrap().push("connection_opened");
    }

    fn connection_closed(&self, _connection: &Arc<dyn Connection>) {
        self.events.lock().unwrap().push("connection_closed");
    }

    fn connection_failed(&self, _channel: &TcpStream, cause: ConnectError, _attachment: &UserAttachment) {
        self.connection_failed.lock().unwrap().push(cause);
    }

    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(task);
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}
