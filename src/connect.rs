use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::endpoint::UserAttachment;
use crate::net::TcpStream;
use crate::scheduler::ScheduledHandle;
use crate::token::Token;

/// An in-progress outbound connect, attached to a key while it waits for
/// write-readiness or its timeout, whichever comes first.
///
/// The channel lives behind a `Mutex<Option<_>>` rather than being owned
/// outright: `Connect` is shared (`Arc`) between the registration key and
/// the scheduled timeout task, so moving the socket out on completion needs
/// interior mutability regardless of how many `Arc` handles are still
/// outstanding.
pub struct Connect {
    channel: Mutex<Option<TcpStream>>,
    pub attachment: UserAttachment,
    pub token: Token,
    failed: AtomicBool,
    timeout_handle: Mutex<Option<ScheduledHandle>>,
}

impl Connect {
    pub fn new(channel: TcpStream, attachment: UserAttachment, token: Token) -> Connect {
        Connect {
            channel: Mutex::new(Some(channel)),
            attachment,
            token,
            failed: AtomicBool::new(false),
            timeout_handle: Mutex::new(None),
        }
    }

    pub fn with_channel<R>(&self, f: impl FnOnce(&TcpStream) -> R) -> Option<R> {
        self.channel.lock().unwrap().as_ref().map(f)
    }

    /// Moves the channel out, leaving the `Connect` with nothing left to
    /// close. Used on both the success path (the channel becomes the live
    /// endpoint's channel) and the failure path (the channel is dropped,
    /// closing it).
    pub fn take_channel(&self) -> Option<TcpStream> {
        self.channel.lock().unwrap().take()
    }

    pub fn set_timeout_handle(&self, handle: ScheduledHandle) {
        *self.timeout_handle.lock().unwrap() = Some(handle);
    }

    /// Cancels the scheduled timeout, if one is still outstanding.
    pub fn cancel_timeout(&self) {
        if let Some(handle) = self.timeout_handle.lock().unwrap().take() {
            handle.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.failed.load(Ordering::SeqCst) && self.channel.lock().unwrap().is_some()
    }

    /// Wins the `failed` flag exactly once, cancels the timeout, and hands
    /// back the channel to close. Returns `None` on every call past the
    /// first — callers use this to guarantee `connection_failed` fires at
    /// most once per connect attempt.
    pub fn fail(&self) -> Option<TcpStream> {
        let won = self
            .failed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if won {
            self.cancel_timeout();
            self.take_channel()
        } else {
            None
        }
    }

    /// Wins the `failed` flag without closing anything — used on the
    /// success path, where the channel is handed off to a live endpoint
    /// instead of being dropped. Returns `true` the first time.
    pub fn succeed(&self) -> bool {
        let won = self
            .failed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if won {
            self.cancel_timeout();
        }

        won
    }
}
