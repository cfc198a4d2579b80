// ── Error taxonomy ────────────────────────────────────────────────────────────

use serde::Serialize;
use thiserror::Error;

/// Every failure the session and transfer layers can report.
///
/// The payload is the user-visible message. It is shown as-is at the
/// boundary, so backends pass remote messages through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Host config is incomplete (no credentials, blank host, …).
    #[error("{0}")]
    Config(String),
    /// DNS, TCP or handshake failure.
    #[error("{0}")]
    Transport(String),
    /// The server rejected every offered credential.
    #[error("{0}")]
    Auth(String),
    /// The ready-timeout (or an opt-in operation timeout) elapsed.
    #[error("{0}")]
    Timeout(String),
    /// Channel, PTY, shell or subsystem request refused.
    #[error("{0}")]
    Protocol(String),
    /// A remote or local filesystem call failed.
    #[error("{0}")]
    Operation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Config,
    Transport,
    Auth,
    Timeout,
    Protocol,
    Operation,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Operation(_) => ErrorKind::Operation,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Config(m)
            | Error::Transport(m)
            | Error::Auth(m)
            | Error::Timeout(m)
            | Error::Protocol(m)
            | Error::Operation(m) => m,
        }
    }

    /// Transient failures an opt-in retry policy may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Error::Timeout(e.to_string()),
            _ => Error::Operation(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
