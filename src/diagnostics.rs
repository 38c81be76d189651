use std::fmt::{self, Write as _};
use std::panic::Location;
use std::sync::mpsc;
use std::time::Duration;

use crate::ready::Ready;
use crate::token::Token;

const DUMP_TIMEOUT: Duration = Duration::from_secs(5);

/// One registered key's state, captured at the moment `DumpKeys` executed
/// on the loop thread.
#[derive(Debug, Clone)]
pub struct KeyDump {
    pub token: Token,
    pub attachment: &'static str,
    pub interest: Ready,
    pub ready: Ready,
}

impl fmt::Display for KeyDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} attachment={} interest={:?} ready={:?}",
            self.token, self.attachment, self.interest, self.ready
        )
    }
}

pub(crate) type DumpSink = mpsc::Sender<Vec<KeyDump>>;

/// Captures the caller's source location (standing in for "first frame of
/// the loop thread's call stack inside the project" — this crate carries no
/// backtrace-capturing dependency) and renders a key snapshot gathered from
/// the loop thread.
#[track_caller]
pub fn dump(out: &mut String, keys: &[KeyDump]) {
    let location = Location::caller();
    let _ = writeln!(out, "selector dump requested at {}:{}", location.file(), location.line());

    for key in keys {
        let _ = writeln!(out, "  {}", key);
    }
}

/// Blocks the calling thread up to 5s for the loop thread to finish
/// executing a submitted `DumpKeys` change.
pub(crate) fn recv_keys(rx: mpsc::Receiver<Vec<KeyDump>>) -> Vec<KeyDump> {
    rx.recv_timeout(DUMP_TIMEOUT).unwrap_or_default()
}
