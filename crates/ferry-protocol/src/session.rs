//! Connection lifecycle states shared by the server and client engines.

use std::fmt;

/// The lifecycle of one connection's session.
///
/// `Open` is entered once the plain socket connect/accept completes; there
/// is no protocol-level handshake. I/O failure or peer close moves the
/// session through `Closing` (cleanup in progress) to `Closed`. Cleanup
/// runs exactly once: the engines only act on transitions this type
/// admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl SessionState {
    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closing) | (Open, Closing) | (Closing, Closed)
        )
    }

    /// Returns true once no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}
