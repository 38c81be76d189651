use std::fmt;
use std::io;

/// Why a [`Connect`](crate::Connect) failed to become a live connection.
///
/// Routed through `manager.connection_failed` exactly once per connect
/// attempt, never through the loop's own error log — the manager decides
/// how loud to be about it.
#[derive(Debug)]
pub enum ConnectError {
    /// The socket's `SO_ERROR` was non-zero, or registering the channel
    /// with the selector itself failed.
    Refused(io::Error),
    /// The scheduled timeout fired before the socket became writable.
    Timeout,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Refused(e) => write!(f, "connect refused: {}", e),
            ConnectError::Timeout => write!(f, "connect timed out"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::Refused(e) => Some(e),
            ConnectError::Timeout => None,
        }
    }
}
