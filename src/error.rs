use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience type alias for Results with MarcusError
pub type Result<T> = std::result::Result<T, MarcusError>;

/// Main error type for Marcus
///
/// Expected coordination outcomes (`NoWork`, `AlreadyAssigned`) are values in
/// the response types, not variants here. This enum covers rejected input,
/// coordination conflicts surfaced by the ledger, and infrastructure failures.
#[derive(Error, Debug)]
pub enum MarcusError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("lease expired for task {task_id}")]
    LeaseExpired { task_id: String },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("malformed decision: {0}")]
    MalformedDecision(String),

    #[error("dependency cycle across declared edges: {0}")]
    DependencyCycle(String),

    #[error("transient provider error: {message}")]
    TransientProvider { message: String },

    #[error("permanent provider error: {message}")]
    PermanentProvider { message: String },

    #[error("operation timed out: {message}")]
    Timeout { message: String },

    #[error("ledger error: {message}")]
    Ledger { message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Closed set of error kinds carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    AlreadyAssigned,
    NoWork,
    MalformedInput,
    MalformedDecision,
    LeaseExpired,
    TransientProviderError,
    PermanentProviderError,
    Timeout,
    Internal,
}

impl MarcusError {
    /// Protocol error kind for the wire shape `{kind, message, retriable}`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarcusError::NotFound(_) => ErrorKind::NotFound,
            MarcusError::Conflict { .. } => ErrorKind::Conflict,
            MarcusError::LeaseExpired { .. } => ErrorKind::LeaseExpired,
            MarcusError::MalformedInput(_) => ErrorKind::MalformedInput,
            MarcusError::MalformedDecision(_) => ErrorKind::MalformedDecision,
            // A declared-edge cycle is a board configuration problem the
            // caller has to fix, not something a retry can clear.
            MarcusError::DependencyCycle(_) => ErrorKind::MalformedInput,
            MarcusError::TransientProvider { .. } => ErrorKind::TransientProviderError,
            MarcusError::PermanentProvider { .. } => ErrorKind::PermanentProviderError,
            MarcusError::Timeout { .. } => ErrorKind::Timeout,
            MarcusError::Http(_) => ErrorKind::TransientProviderError,
            MarcusError::Ledger { .. }
            | MarcusError::Configuration(_)
            | MarcusError::Serialization(_)
            | MarcusError::Io(_)
            | MarcusError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn retriable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::TransientProviderError | ErrorKind::Timeout
        )
    }
}
