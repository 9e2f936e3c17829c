//! Session lifecycle states.
//!
//! Only these transitions are visible to the application layer:
//!
//! ```text
//!                 ┌──── receive idle timeout ────▶ IDLE_CLOSED
//!  ESTABLISHED ───┼──── close() / cancel ────────▶ CANCELLED
//!                 └──── socket I/O failure ──────▶ FAILED
//! ```
//!
//! The terminal states are sticky: the first one reached wins.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Both loops running; data may flow.
    #[default]
    Established,
    /// No datagram arrived within the idle timeout.
    IdleClosed,
    /// The application closed the session.
    Cancelled,
    /// A loop hit a fatal socket error.
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Established)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Established => "ESTABLISHED",
            Self::IdleClosed => "IDLE_CLOSED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_established_is_live() {
        assert!(!SessionState::default().is_terminal());
        for s in [
            SessionState::IdleClosed,
            SessionState::Cancelled,
            SessionState::Failed,
        ] {
            assert!(s.is_terminal(), "{s}");
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(SessionState::IdleClosed.to_string(), "IDLE_CLOSED");
    }
}
