use thiserror::Error;

use tmi_protocol::DiagramId;
use tmi_protocol::UserId;

/// The seven stable error kinds of spec.md §7. Every [`Error`] maps to
/// exactly one; `code()` is what actually travels on the wire in an
/// `error`/`authorization_denied` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    AuthorizationDenied,
    Validation,
    StateConflict,
    SlowConsumer,
    Persistence,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Protocol => "protocol",
            ErrorKind::AuthorizationDenied => "authorization_denied",
            ErrorKind::Validation => "validation",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::SlowConsumer => "slow_consumer",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("operation rejected: {0}")]
    Validation(String),

    #[error("stale update_vector: observed {observed}, authoritative {authoritative}")]
    StateConflict { observed: u64, authoritative: u64 },

    #[error("authorization denied for {0}")]
    AuthorizationDenied(UserId),

    #[error("{0} is in the session denylist")]
    Denylisted(UserId),

    #[error("no active session for diagram {0}")]
    SessionNotFound(DiagramId),

    #[error("diagram {0} not found in the store")]
    DiagramNotFound(DiagramId),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("session inbox is gone")]
    SessionGone,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::StateConflict { .. } => ErrorKind::StateConflict,
            Error::AuthorizationDenied(_) | Error::Denylisted(_) => ErrorKind::AuthorizationDenied,
            Error::SessionNotFound(_) | Error::DiagramNotFound(_) => ErrorKind::Internal,
            Error::Persistence(_) => ErrorKind::Persistence,
            Error::SessionGone | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
