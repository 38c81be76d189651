//! The loop itself: owns one [`Selector`], drives the change-submission
//! protocol in [`change`](crate::change), and dispatches readiness to
//! attached endpoints.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use indexmap::IndexMap;

use crate::change::{Change, ChangeQueue};
use crate::connect::Connect;
use crate::diagnostics::{self, DumpSink, KeyDump};
use crate::endpoint::{Attachment, UserAttachment};
use crate::epoll_opt::EpollOpt;
use crate::error::ConnectError;
use crate::event::Events;
use crate::manager::SelectorManager;
use crate::net::{TcpListener, TcpStream};
use crate::ready::Ready;
use crate::selector::Selector;
use crate::source::Source;
use crate::sys::priority::ThreadPriorityGuard;
use crate::sys::socket;
use crate::token::Token;
use crate::waker::Waker;

static NEXT_LOOP_ID: AtomicUsize = AtomicUsize::new(0);

const WAKER_TOKEN: Token = Token(0);

/// A registered channel. The loop only ever needs `Source` + `AsRawFd` on
/// it; this enum exists so one `IndexMap` can hold both listeners and
/// streams without dynamic dispatch.
pub enum Channel {
    Listener(TcpListener),
    Stream(TcpStream),
}

impl Channel {
    pub fn as_listener(&self) -> Option<&TcpListener> {
        match self {
            Channel::Listener(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&TcpStream> {
        match self {
            Channel::Stream(s) => Some(s),
            _ => None,
        }
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Channel::Listener(l) => l.as_raw_fd(),
            Channel::Stream(s) => s.as_raw_fd(),
        }
    }
}

impl Source for Channel {
    fn add(&self, selector: &Selector, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        match self {
            Channel::Listener(l) => l.add(selector, token, interest, opts),
            Channel::Stream(s) => s.add(selector, token, interest, opts),
        }
    }

    fn modify(&self, selector: &Selector, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        match self {
            Channel::Listener(l) => l.modify(selector, token, interest, opts),
            Channel::Stream(s) => s.modify(selector, token, interest, opts),
        }
    }

    fn delete(&self, selector: &Selector) -> io::Result<()> {
        match self {
            Channel::Listener(l) => l.delete(selector),
            Channel::Stream(s) => s.delete(selector),
        }
    }
}

struct KeyState {
    fd: RawFd,
    channel: Option<Channel>,
    interest: Ready,
    attachment: Attachment,
    ready: Ready,
}

type Latch = Arc<(Mutex<bool>, Condvar)>;

fn new_latch() -> Latch {
    Arc::new((Mutex::new(false), Condvar::new()))
}

fn release(latch: &Latch) {
    let (lock, cvar) = &**latch;
    *lock.lock().unwrap() = true;
    cvar.notify_all();
}

/// Waits on `latch` up to `timeout`; returns `true` if it was released in
/// time.
fn await_latch(latch: &Latch, timeout: Duration) -> bool {
    let (lock, cvar) = &**latch;
    let guard = lock.lock().unwrap();
    let (_guard, result) = cvar.wait_timeout_while(guard, timeout, |done| !*done).unwrap();
    !result.timed_out()
}

/// One managed selector: a single-threaded epoll event loop, with a
/// cross-thread change-submission entry point as its sole synchronization
/// surface.
pub struct SelectorLoop {
    id: usize,
    selector: Selector,
    waker: Waker,
    changes: ChangeQueue,
    keys: Mutex<IndexMap<Token, KeyState>>,
    next_token: AtomicUsize,
    owner: Mutex<Option<ThreadId>>,
    running: AtomicBool,
    stopping: AtomicBool,
    closed: AtomicBool,
    stop_timeout: Duration,
    manager: Arc<dyn SelectorManager>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
    stop_latch: Latch,
}

impl SelectorLoop {
    pub fn new(manager: Arc<dyn SelectorManager>) -> io::Result<Arc<SelectorLoop>> {
        Self::with_stop_timeout(manager, Duration::from_secs(5))
    }

    pub fn with_stop_timeout(manager: Arc<dyn SelectorManager>, stop_timeout: Duration) -> io::Result<Arc<SelectorLoop>> {
        let selector = Selector::new()?;
        let waker = Waker::new()?;
        selector.register(&waker, WAKER_TOKEN, Ready::readable(), EpollOpt::edge())?;

        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(SelectorLoop {
            id,
            selector,
            waker,
            changes: ChangeQueue::new(),
            keys: Mutex::new(IndexMap::new()),
            next_token: AtomicUsize::new(1),
            owner: Mutex::new(None),
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stop_timeout,
            manager,
            join: Mutex::new(None),
            stop_latch: new_latch(),
        }))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn is_selector_thread(&self) -> bool {
        *self.owner.lock().unwrap() == Some(thread::current().id())
    }

    /// Spawns the loop thread. Returns immediately; the loop runs until
    /// [`stop`](Self::stop) is called.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let loop_ref = self.clone();

        let handle = thread::Builder::new()
            .name(format!("selector-loop-{}", self.id))
            .spawn(move || loop_ref.run())?;

        *self.join.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Submits a `Stop` change and waits up to `stop_timeout` for the loop
    /// thread to finish tearing down. Returns `false` on timeout; resources
    /// are still closed best-effort.
    pub fn stop(self: &Arc<Self>) -> io::Result<bool> {
        self.submit(Change::Stop)?;
        let stopped = await_latch(&self.stop_latch, self.stop_timeout);

        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }

        Ok(stopped)
    }

    /// The sole cross-thread entry point: safe to call from any thread,
    /// including the loop thread itself.
    pub fn submit(&self, change: Change) -> io::Result<()> {
        self.changes.submit(&self.waker, change)
    }

    pub fn submit_acceptor(&self, listener: TcpListener) -> io::Result<()> {
        self.submit(Change::Acceptor(listener))
    }

    pub fn submit_accept(&self, channel: TcpStream, attachment: UserAttachment) -> io::Result<()> {
        self.submit(Change::Accept(channel, attachment))
    }

    /// Starts a non-blocking outbound connect and submits it to this loop.
    pub fn connect(&self, addr: &SocketAddr, attachment: UserAttachment) -> io::Result<()> {
        let stream = TcpStream::connect_nonblocking(addr)?;
        self.submit(Change::Connect(stream, attachment))
    }

    pub fn destroy_endpoint(&self, attachment: &Attachment) {
        if let Attachment::Live(endpoint) = attachment {
            if let Some(connection) = endpoint.connection() {
                self.manager.connection_closed(&connection);
            }
            self.manager.endpoint_closed(endpoint);
        }
    }

    #[track_caller]
    pub fn dump(&self, out: &mut String) -> io::Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.submit(Change::DumpKeys(tx))?;
        let keys = diagnostics::recv_keys(rx);
        diagnostics::dump(out, &keys);
        Ok(())
    }

    fn run(self: Arc<Self>) {
        *self.owner.lock().unwrap() = Some(thread::current().id());
        self.running.store(true, Ordering::SeqCst);

        // Dropped at the end of this function, restoring the thread's
        // original name and priority right before it exits.
        let _priority_guard = ThreadPriorityGuard::apply(self.manager.priority_delta());

        let mut events = Events::with_capacity(1024);

        while self.is_running() {
            self.run_iteration(&mut events);
        }

        if self.is_stopping() {
            // One last drain so late changes and already-selected work get
            // a final pass before the thread exits.
            self.run_iteration(&mut events);
            self.stopping.store(false, Ordering::SeqCst);
        }
    }

    /// Runs one `select()` pass, catching both its `io::Result` and any
    /// panic escaping from dispatch/change execution — a single
    /// misbehaving key must never take the loop thread down with it.
    fn run_iteration(self: &Arc<Self>, events: &mut Events) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.select(events)));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) if self.is_stopping() => {
                log::debug!("selector loop {} iteration failed while stopping: {}", self.id, e);
            }
            Ok(Err(e)) => log::warn!("selector loop {} iteration failed: {}", self.id, e),
            Err(_) if self.is_stopping() => {
                log::debug!("selector loop {} iteration panicked while stopping", self.id);
            }
            Err(_) => log::warn!("selector loop {} iteration panicked", self.id),
        }
    }

    fn select(self: &Arc<Self>, events: &mut Events) -> io::Result<()> {
        let self_for_drain = self.clone();
        let should_wait = self.changes.drain_and_prepare_wait(move |change| self_for_drain.run_change(change));

        if !should_wait || self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.selector.wait(events, None)?;
        self.changes.end_wait();

        let ready_tokens = self.collect_ready(events);
        self.dispatch(&ready_tokens);

        thread::yield_now();

        self.update_keys(&ready_tokens);

        Ok(())
    }

    fn collect_ready(&self, events: &Events) -> Vec<Token> {
        let mut keys = self.keys.lock().unwrap();
        let mut tokens = Vec::with_capacity(events.len());

        for event in events {
            if event.token() == WAKER_TOKEN {
                let _ = self.waker.finish();
                continue;
            }

            if let Some(key) = keys.get_mut(&event.token()) {
                key.ready = event.readiness();
                tokens.push(event.token());
            }
        }

        tokens
    }

    fn dispatch(self: &Arc<Self>, tokens: &[Token]) {
        for &token in tokens {
            let (attachment, ready, is_accept_ready) = {
                let keys = self.keys.lock().unwrap();
                match keys.get(&token) {
                    Some(key) => (key.attachment.clone(), key.ready, key.channel.as_ref().and_then(Channel::as_listener).is_some()),
                    // Gone from the map means already closed concurrently:
                    // the cancelled-key case, logged at debug rather than warn.
                    None => {
                        log::debug!("selector loop {} skipping cancelled key {:?}", self.id, token);
                        continue;
                    }
                }
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &attachment {
                Attachment::Live(endpoint) => {
                    endpoint.on_selected();
                }
                Attachment::Pending(connect) => {
                    self.process_connect(token, connect.clone());
                }
                Attachment::Nil if is_accept_ready && ready.is_readable() => {
                    self.process_accept(token);
                }
                Attachment::Nil => {
                    log::warn!("selector loop {} key {:?} had no attachment and no accept interest", self.id, token);
                    self.close_key_quietly(token);
                }
            }));

            if outcome.is_err() {
                log::warn!("selector loop {} key {:?} dispatch panicked", self.id, token);
                self.close_key_quietly(token);
            }
        }
    }

    fn update_keys(&self, tokens: &[Token]) {
        let mut keys = self.keys.lock().unwrap();

        for &token in tokens {
            if let Some(key) = keys.get_mut(&token) {
                if let Attachment::Live(endpoint) = key.attachment.clone() {
                    drop(keys);
                    endpoint.update_key();
                    let wanted = endpoint.interest();
                    keys = self.keys.lock().unwrap();

                    if let Some(key) = keys.get_mut(&token) {
                        if wanted != key.interest {
                            if self.selector.modify(key.fd, token, wanted, EpollOpt::edge()).is_ok() {
                                key.interest = wanted;
                            }
                        }
                    }
                }

                if let Some(key) = keys.get_mut(&token) {
                    key.ready = Ready::empty();
                }
            }
        }
    }

    fn close_key_quietly(&self, token: Token) {
        let removed = self.keys.lock().unwrap().swap_remove(&token);

        if let Some(key) = removed {
            let _ = self.selector.delete(key.fd);
            self.destroy_endpoint(&key.attachment);
        }
    }

    fn run_change(self: &Arc<Self>, change: Change) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match change {
            Change::Acceptor(listener) => self.exec_acceptor(listener),
            Change::Accept(stream, attachment) => self.exec_accept(stream, attachment),
            Change::Connect(stream, attachment) => self.exec_connect(stream, attachment),
            Change::ConnectTimeout(connect) => {
                self.exec_connect_timeout(connect);
                Ok(())
            }
            Change::Stop => {
                self.exec_stop();
                Ok(())
            }
            Change::DumpKeys(sink) => {
                self.exec_dump(sink);
                Ok(())
            }
            Change::User(f) => {
                f(self);
                Ok(())
            }
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("selector loop {} change execution failed: {}", self.id, e),
            Err(_) => log::debug!("selector loop {} change execution panicked", self.id),
        }
    }

    fn exec_acceptor(&self, listener: TcpListener) -> io::Result<()> {
        let token = self.next_token();
        let fd = listener.as_raw_fd();

        if let Err(e) = self.selector.register(&listener, token, Ready::readable(), EpollOpt::edge()) {
            log::warn!("selector loop {} failed to register acceptor: {}", self.id, e);
            return Err(e);
        }

        self.keys.lock().unwrap().insert(
            token,
            KeyState {
                fd,
                channel: Some(Channel::Listener(listener)),
                interest: Ready::readable(),
                attachment: Attachment::Nil,
                ready: Ready::empty(),
            },
        );

        Ok(())
    }

    fn process_accept(&self, token: Token) {
        loop {
            let accepted = {
                let keys = self.keys.lock().unwrap();
                match keys.get(&token).and_then(|k| k.channel.as_ref()).and_then(Channel::as_listener) {
                    Some(listener) => listener.accept(),
                    None => return,
                }
            };

            match accepted {
                Ok((stream, _addr)) => self.manager.accepted(stream),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("selector loop {} accept failed: {}", self.id, e);
                    break;
                }
            }
        }
    }

    fn exec_accept(self: &Arc<Self>, stream: TcpStream, attachment: UserAttachment) -> io::Result<()> {
        let token = self.next_token();
        let fd = stream.as_raw_fd();

        self.selector.register(&stream, token, Ready::empty(), EpollOpt::edge())?;

        // Built before the key is inserted so `new_endpoint` never runs with
        // `keys` locked: a panicking manager callback must not poison it.
        let channel = Channel::Stream(stream);
        let endpoint = self.manager.new_endpoint(&channel, self.clone(), token);

        self.keys.lock().unwrap().insert(
            token,
            KeyState {
                fd,
                channel: Some(channel),
                interest: Ready::empty(),
                attachment: Attachment::Nil,
                ready: Ready::empty(),
            },
        );

        self.manager.endpoint_opened(&endpoint);
        let connection = self.manager.new_connection(&endpoint, attachment);
        endpoint.set_connection(connection.clone());
        self.manager.connection_opened(&connection);

        let wanted = endpoint.interest();
        if let Some(key) = self.keys.lock().unwrap().get_mut(&token) {
            key.attachment = Attachment::Live(endpoint);

            if self.selector.modify(key.fd, token, wanted, EpollOpt::edge()).is_ok() {
                key.interest = wanted;
            }
        }

        Ok(())
    }

    fn exec_connect(self: &Arc<Self>, stream: TcpStream, attachment: UserAttachment) -> io::Result<()> {
        let token = self.next_token();
        let fd = stream.as_raw_fd();
        let connect = Arc::new(Connect::new(stream, attachment, token));

        if let Err(e) = self.selector.add(fd, token, Ready::writable(), EpollOpt::edge()) {
            if let Some(channel) = connect.fail() {
                self.manager.connection_failed(&channel, ConnectError::Refused(e), &connect.attachment);
            }
            return Ok(());
        }

        let loop_ref = self.clone();
        let connect_for_timeout = connect.clone();
        let handle = self.manager.scheduler().schedule(
            self.manager.connect_timeout(),
            Box::new(move || {
                let _ = loop_ref.submit(Change::ConnectTimeout(connect_for_timeout));
            }),
        );
        connect.set_timeout_handle(handle);

        self.keys.lock().unwrap().insert(
            token,
            KeyState {
                fd,
                channel: None,
                interest: Ready::writable(),
                attachment: Attachment::Pending(connect),
                ready: Ready::empty(),
            },
        );

        Ok(())
    }

    fn process_connect(self: &Arc<Self>, token: Token, connect: Arc<Connect>) {
        if !connect.is_pending() {
            return;
        }

        let finished = connect.with_channel(|channel| self.manager.finish_connect(channel));

        match finished {
            Some(true) => self.finish_connect_success(token, connect),
            Some(false) | None => {
                self.finish_connect_failure(token, connect, io::Error::new(io::ErrorKind::ConnectionRefused, "connect refused"));
            }
        }
    }

    fn finish_connect_success(self: &Arc<Self>, token: Token, connect: Arc<Connect>) {
        if !connect.succeed() {
            return;
        }

        let stream = match connect.take_channel() {
            Some(c) => c,
            None => return,
        };

        let fd = stream.as_raw_fd();
        let attachment = connect.attachment.clone();

        let _ = self.selector.modify(fd, token, Ready::empty(), EpollOpt::edge());

        // Same ordering as `exec_accept`: build the channel and call
        // `new_endpoint` before `keys` is touched at all.
        let channel = Channel::Stream(stream);
        let endpoint = self.manager.new_endpoint(&channel, self.clone(), token);

        self.keys.lock().unwrap().insert(
            token,
            KeyState {
                fd,
                channel: Some(channel),
                interest: Ready::empty(),
                attachment: Attachment::Nil,
                ready: Ready::empty(),
            },
        );

        self.manager.endpoint_opened(&endpoint);
        let connection = self.manager.new_connection(&endpoint, attachment);
        endpoint.set_connection(connection.clone());
        self.manager.connection_opened(&connection);

        let wanted = endpoint.interest();
        if let Some(key) = self.keys.lock().unwrap().get_mut(&token) {
            key.attachment = Attachment::Live(endpoint);

            if self.selector.modify(key.fd, token, wanted, EpollOpt::edge()).is_ok() {
                key.interest = wanted;
            }
        }
    }

    fn finish_connect_failure(&self, token: Token, connect: Arc<Connect>, cause: io::Error) {
        if let Some(channel) = connect.fail() {
            self.manager.connection_failed(&channel, ConnectError::Refused(cause), &connect.attachment);
        }

        self.close_key_quietly(token);
    }

    fn exec_connect_timeout(&self, connect: Arc<Connect>) {
        if !connect.is_pending() {
            return;
        }

        if let Some(channel) = connect.fail() {
            self.manager.connection_failed(&channel, ConnectError::Timeout, &connect.attachment);
            self.close_key_quietly(connect.token);
        }
    }

    fn exec_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        let endpoints: Vec<_> = {
            let keys = self.keys.lock().unwrap();
            keys.values().filter_map(|k| k.attachment.as_live().cloned()).collect()
        };

        for endpoint in endpoints {
            let latch = new_latch();
            let latch_for_task = latch.clone();
            let ep = endpoint.clone();

            self.manager.execute(Box::new(move || {
                ep.close();
                release(&latch_for_task);
            }));

            if !await_latch(&latch, self.stop_timeout) {
                log::warn!("selector loop {} endpoint close exceeded stop_timeout", self.id);
            }
        }

        // Closed unconditionally, even if an endpoint's close() blew its
        // budget above: the multiplexer itself goes away on every Stop.
        self.selector.close();

        self.closed.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        release(&self.stop_latch);
    }

    fn exec_dump(&self, sink: DumpSink) {
        let keys = self.keys.lock().unwrap();

        let dump: Vec<KeyDump> = keys
            .iter()
            .map(|(token, key)| KeyDump {
                token: *token,
                attachment: match key.attachment {
                    Attachment::Nil => "nil",
                    Attachment::Pending(_) => "pending",
                    Attachment::Live(_) => "live",
                },
                interest: key.interest,
                ready: key.ready,
            })
            .collect();

        let _ = sink.send(dump);
    }
}

impl Drop for SelectorLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
