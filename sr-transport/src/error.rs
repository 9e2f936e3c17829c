//! Error taxonomy for the transport.
//!
//! Protocol anomalies (bad datagram sizes, stale acks) never surface here:
//! the loops log and discard them.  What remains are configuration mistakes,
//! socket failures, and session-lifecycle outcomes the application must see.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::segment::SegmentError;
use crate::window::WindowError;

/// Crate-wide result alias.
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Everything that can go wrong while a session is running.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying datagram socket failed.
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),

    /// Session parameters or tunables were rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A segment could not be built or parsed.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// A window operation was attempted outside the window.
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// The session was cancelled while the operation was waiting.
    #[error("session cancelled")]
    Cancelled,

    /// The session ended (idle timeout or explicit close) before the
    /// operation could complete.
    #[error("connection closed")]
    Closed,

    /// A zero-terminated string did not end within the allowed length.
    #[error("string exceeds {max} bytes without a terminator")]
    Unterminated { max: usize },

    /// A write larger than the ring can ever hold in one piece.
    #[error("write of {len} bytes exceeds ring capacity {capacity}")]
    Oversized { len: usize, capacity: usize },

    /// A zero-terminated string was not valid UTF-8.
    #[error("string is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// One of the session loops stopped with an error.
    #[error("session task failed: {0}")]
    TaskFailed(String),
}

impl TransportError {
    /// `true` for errors that only describe how the session ended.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_are_flagged() {
        assert!(TransportError::Closed.is_lifecycle());
        assert!(TransportError::Cancelled.is_lifecycle());
        assert!(!TransportError::Unterminated { max: 4 }.is_lifecycle());
    }

    #[test]
    fn io_error_converts() {
        let e: TransportError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(e.to_string().contains("boom"));
    }
}
