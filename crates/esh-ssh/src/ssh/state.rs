// ── Session lifecycle ─────────────────────────────────────────────────────────

use esh_core::{Error, ErrorKind};
use serde::Serialize;
use std::fmt;

/// `Created → Connecting → Ready → Closing → Closed`, with
/// `AuthFailed | TransportError | TimedOut` as terminal failures reachable
/// only from `Connecting`. A reconnect is a new session, never a
/// transition out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Created,
    Connecting,
    Ready,
    Closing,
    Closed,
    AuthFailed,
    TransportError,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Closed
                | SessionState::AuthFailed
                | SessionState::TransportError
                | SessionState::TimedOut
        )
    }

    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Connecting)
                | (Connecting, Ready)
                | (Connecting, AuthFailed)
                | (Connecting, TransportError)
                | (Connecting, TimedOut)
                | (Ready, Closing)
                | (Ready, Closed)
                | (Closing, Closed)
        )
    }

    pub fn advance(self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    /// Terminal state for a failed connect attempt.
    pub fn for_failure(error: &Error) -> SessionState {
        match error.kind() {
            ErrorKind::Auth => SessionState::AuthFailed,
            ErrorKind::Timeout => SessionState::TimedOut,
            _ => SessionState::TransportError,
        }
    }
}
