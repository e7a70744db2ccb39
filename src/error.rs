//! Error types for kvtxlog
//!
//! Provides a unified error type for the transaction log, its backends,
//! the recovery coordinator and the in-memory store.

use thiserror::Error;

/// Result type alias using LogError
pub type Result<T> = std::result::Result<T, LogError>;

/// Unified error type for kvtxlog operations
#[derive(Debug, Error)]
pub enum LogError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Replay Errors
    // -------------------------------------------------------------------------
    #[error("Malformed log record at line {line}: {reason}")]
    Parse { line: u64, reason: String },

    #[error("Transaction numbers out of sequence: {found} follows {previous}")]
    SequenceViolation { previous: u64, found: u64 },

    // -------------------------------------------------------------------------
    // Relational Backend Errors
    // -------------------------------------------------------------------------
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    // -------------------------------------------------------------------------
    // Store Errors
    // -------------------------------------------------------------------------
    #[error("No such key")]
    NoSuchKey,

    #[error("Store error: {0}")]
    Store(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Invalid log state: {0}")]
    InvalidState(String),

    #[error("Log writer has stopped")]
    WriterStopped,

    #[error("Log writer failed: {0}")]
    WriterFailed(String),

    #[error("Sequence numbers exhausted after {last}")]
    SequenceExhausted { last: u64 },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LogError {
    /// HTTP status a request-facing layer should answer with for this error.
    ///
    /// Only a missing key is a client-visible condition; every other failure
    /// of the store or the log is a server error.
    pub fn status_code(&self) -> u16 {
        match self {
            LogError::NoSuchKey => 404,
            _ => 500,
        }
    }

    /// Whether this error means the persisted log itself cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LogError::Parse { .. } | LogError::SequenceViolation { .. }
        )
    }
}

impl From<sqlx::Error> for LogError {
    fn from(e: sqlx::Error) -> Self {
        LogError::Database(e.to_string())
    }
}
