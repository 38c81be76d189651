use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::endpoint::{Connection, EndPoint, SelectableEndPoint, UserAttachment};
use crate::error::ConnectError;
use crate::net::TcpStream;
use crate::ready::Ready;
use crate::scheduler::Scheduler;
use crate::selector_loop::{Channel, SelectorLoop};
use crate::sys::socket;
use crate::token::Token;

/// The contract a [`SelectorLoop`] consumes from its owning pool: endpoint
/// and connection construction, accept/connect decisions, and lifecycle
/// notifications.
///
/// Concrete endpoint/connection implementations, buffer pools, and
/// protocol framing are out of scope for this crate (they live above it);
/// [`SelectorPool`] below is a minimal implementation thin enough to drive
/// the lifecycle and nothing else.
pub trait SelectorManager: Send + Sync {
    fn new_endpoint(
        &self,
        channel: &Channel,
        selector_loop: Arc<SelectorLoop>,
        token: Token,
    ) -> Arc<dyn SelectableEndPoint>;

    fn new_connection(
        &self,
        endpoint: &Arc<dyn SelectableEndPoint>,
        attachment: UserAttachment,
    ) -> Arc<dyn Connection>;

    /// Decides which loop in the pool an accepted channel is handed to.
    fn accepted(&self, channel: TcpStream);

    /// Checks whether a pending outbound connect has completed.
    fn finish_connect(&self, channel: &TcpStream) -> bool;

    fn endpoint_opened(&self, endpoint: &Arc<dyn SelectableEndPoint>);
    fn endpoint_closed(&self, endpoint: &Arc<dyn SelectableEndPoint>);
    fn connection_opened(&self, connection: &Arc<dyn Connection>);
    fn connection_closed(&self, connection: &Arc<dyn Connection>);
    fn connection_failed(&self, channel: &TcpStream, cause: ConnectError, attachment: &UserAttachment);

    /// Hands blocking/substantive work off to a worker pool; the loop
    /// thread never runs it inline.
    fn execute(&self, task: Box<dyn FnOnce() + Send>);

    fn scheduler(&self) -> Arc<dyn Scheduler>;

    fn connect_timeout(&self) -> Duration;

    /// Nice-value offset applied to the loop thread for the duration of
    /// `run()`, restored to the thread's prior value on exit. `0` leaves
    /// scheduling priority untouched.
    fn priority_delta(&self) -> i32 {
        0
    }
}

/// A bare endpoint the pool attaches when no richer protocol layer is
/// plugged in. `on_selected`/`update_key` are no-ops; real deployments
/// replace this with their own [`SelectableEndPoint`].
struct PassiveEndPoint {
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl EndPoint for PassiveEndPoint {
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

impl SelectableEndPoint for PassiveEndPoint {
    fn on_selected(&self) {}

    fn update_key(&self) {}

    fn interest(&self) -> Ready {
        Ready::readable()
    }
}

struct PassiveConnection;

impl Connection for PassiveConnection {
    fn close(&self) {}
}

/// A minimal, round-robin [`SelectorManager`] owning a fixed pool of
/// [`SelectorLoop`]s. Assigns accepted channels and new connections to
/// loops in rotation; an embedder replacing buffer pools, framing, or real
/// connection objects does so by implementing [`SelectorManager`] directly
/// rather than subclassing this one.
pub struct SelectorPool {
    loops: Vec<Arc<SelectorLoop>>,
    next: AtomicUsize,
    scheduler: Arc<dyn Scheduler>,
    connect_timeout: Duration,
}

impl SelectorPool {
    pub fn new(loops: Vec<Arc<SelectorLoop>>, scheduler: Arc<dyn Scheduler>, connect_timeout: Duration) -> SelectorPool {
        SelectorPool {
            loops,
            next: AtomicUsize::new(0),
            scheduler,
            connect_timeout,
        }
    }

    fn pick(&self) -> &Arc<SelectorLoop> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        &self.loops[idx]
    }
}

impl SelectorManager for SelectorPool {
    fn new_endpoint(
        &self,
        _channel: &Channel,
        _selector_loop: Arc<SelectorLoop>,
        _token: Token,
    ) -> Arc<dyn SelectableEndPoint> {
        Arc::new(PassiveEndPoint { connection: Mutex::new(None) })
    }

    fn new_connection(
        &self,
        _endpoint: &Arc<dyn SelectableEndPoint>,
        _attachment: UserAttachment,
    ) -> Arc<dyn Connection> {
        Arc::new(PassiveConnection)
    }

    fn accepted(&self, channel: TcpStream) {
        let target = self.pick().clone();
        let attachment: UserAttachment = Arc::new(());
        let _ = target.submit_accept(channel, attachment);
    }

    fn finish_connect(&self, channel: &TcpStream) -> bool {
        matches!(socket::take_socket_error(channel.as_raw_fd()), Ok(None))
    }

    fn endpoint_opened(&self, _endpoint: &Arc<dyn SelectableEndPoint>) {}
    fn endpoint_closed(&self, _endpoint: &Arc<dyn SelectableEndPoint>) {}
    fn connection_opened(&self, _connection: &Arc<dyn Connection>) {}
    fn connection_closed(&self, _connection: &Arc<dyn Connection>) {}

    fn connection_failed(&self, _channel: &TcpStream, cause: ConnectError, _attachment: &UserAttachment) {
        log::warn!("connect failed: {}", cause);
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
