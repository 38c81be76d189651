//! The change-submission protocol: a lock-free tri-state guarding two
//! change buffers, swapped by the loop thread before every wait.
//!
//! This is the one place in the crate that reaches for raw `unsafe` outside
//! syscall plumbing, in the same spirit as `Selector::wait`'s buffer-length
//! fixup: a small, self-contained unsafe block backed by an invariant
//! documented right next to it. Soundness rests entirely on the tri-state
//! discipline below: `add` is only ever touched while `state == LOCKED`,
//! and `run` is only ever touched by the loop thread.

use std::cell::UnsafeCell;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use crate::connect::Connect;
use crate::diagnostics::DumpSink;
use crate::endpoint::UserAttachment;
use crate::net::{TcpListener, TcpStream};
use crate::selector_loop::SelectorLoop;
use crate::waker::Waker;

const PROCESSING: u8 = 0;
const SELECTING: u8 = 1;
const LOCKED: u8 = 2;

/// A unit of deferred work, runnable exactly once on the loop thread.
pub enum Change {
    /// Register a freshly bound/accepted listener for `accept` readiness.
    Acceptor(TcpListener),
    /// Register an accepted channel and attach an endpoint to it.
    Accept(TcpStream, UserAttachment),
    /// Begin a non-blocking outbound connect.
    Connect(TcpStream, UserAttachment),
    /// Fired by the scheduler when a connect's timeout elapses.
    ConnectTimeout(Arc<Connect>),
    /// Shut the loop down.
    Stop,
    /// Snapshot every registered key and send it down the sink.
    DumpKeys(DumpSink),
    /// An opaque, caller-submitted unit of work.
    User(Box<dyn FnOnce(&SelectorLoop) + Send>),
}

/// Two change buffers (`run`/`add`) behind the `PROCESSING`/`SELECTING`/
/// `LOCKED` tri-state atomic described in the loop's design.
pub(crate) struct ChangeQueue {
    state: AtomicU8,
    run: UnsafeCell<Vec<Change>>,
    add: UnsafeCell<Vec<Change>>,
}

// Safety: `run` is read/written only by the loop thread. `add` is
// read/written only while `state == LOCKED`, which at most one thread at a
// time can observe via the CAS in `submit`/`begin_wait`.
unsafe impl Sync for ChangeQueue {}

impl ChangeQueue {
    pub fn new() -> ChangeQueue {
        ChangeQueue {
            state: AtomicU8::new(PROCESSING),
            run: UnsafeCell::new(Vec::new()),
            add: UnsafeCell::new(Vec::new()),
        }
    }

    /// Callable from any thread, including the loop thread.
    pub fn submit(&self, waker: &Waker, change: Change) -> io::Result<()> {
        loop {
            match self.state.load(Ordering::Acquire) {
                PROCESSING => {
                    if self
                        .state
                        .compare_exchange(PROCESSING, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                    {
                        unsafe { (*self.add.get()).push(change) };
                        self.state.store(PROCESSING, Ordering::Release);
                        return Ok(());
                    }
                }
                SELECTING => {
                    if self
                        .state
                        .compare_exchange(SELECTING, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                    {
                        unsafe { (*self.add.get()).push(change) };
                        waker.wakeup()?;
                        // Deliberately not restored to SELECTING: the loop
                        // is about to leave the wait and will see `add` on
                        // its own, so a second wakeup would be wasted.
                        self.state.store(PROCESSING, Ordering::Release);
                        return Ok(());
                    }
                }
                _ => thread::yield_now(),
            }
        }
    }

    /// Drains `run` by calling `run_change` on each entry in order, then
    /// either swaps `add` into `run` and keeps processing (returns `false`)
    /// or parks the state in `SELECTING` and returns `true`, meaning the
    /// caller should now block in the multiplexer wait.
    pub fn drain_and_prepare_wait<F: FnMut(Change)>(&self, mut run_change: F) -> bool {
        loop {
            {
                let run = unsafe { &mut *self.run.get() };
                for change in run.drain(..) {
                    run_change(change);
                }
            }

            match self
                .state
                .compare_exchange(PROCESSING, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => {
                    let add_is_empty = unsafe { (*self.add.get()).is_empty() };

                    if add_is_empty {
                        self.state.store(SELECTING, Ordering::Release);
                        return true;
                    } else {
                        unsafe {
                            std::mem::swap(&mut *self.run.get(), &mut *self.add.get());
                        }
                        self.state.store(PROCESSING, Ordering::Release);
                    }
                }
                Err(_) => thread::yield_now(),
            }
        }
    }

    /// Reconciles state after the blocking wait returns.
    pub fn end_wait(&self) {
        loop {
            match self.state.load(Ordering::Acquire) {
                SELECTING => {
                    if self
                        .state
                        .compare_exchange(SELECTING, PROCESSING, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        return;
                    }
                }
                // A submitter's `CAS(SELECTING, LOCKED)` already flipped us
                // to `PROCESSING` after the wait unblocked — benign, nothing
                // to reconcile.
                PROCESSING => return,
                _ => thread::yield_now(),
            }
        }
    }
}
