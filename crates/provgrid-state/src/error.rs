//! Error types for the provgrid state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// Absent, or owned by another tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// The row is in a state that forbids the change (e.g. already finished).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

/// Coarse classification of a [`StateError`] for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Transaction,
    Timeout,
    Storage,
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::NotFound(_) => ErrorKind::NotFound,
            StateError::Conflict(_) => ErrorKind::Conflict,
            StateError::Validation(_) => ErrorKind::Validation,
            StateError::Transaction(_) => ErrorKind::Transaction,
            StateError::Timeout(_) => ErrorKind::Timeout,
            StateError::Open(_)
            | StateError::Table(_)
            | StateError::Read(_)
            | StateError::Write(_)
            | StateError::Serialize(_)
            | StateError::Deserialize(_) => ErrorKind::Storage,
        }
    }

    /// Whether the job driver may retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transaction | ErrorKind::Timeout)
    }

    pub(crate) fn reservation_not_found(id: u64) -> Self {
        StateError::NotFound(format!("reservation {id}"))
    }
}
