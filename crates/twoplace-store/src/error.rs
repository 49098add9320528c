use thiserror::Error;
use twoplace_shared::{PatchError, ValidationError};

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A document with the same key already exists.
    #[error("Record already exists")]
    AlreadyExists,

    /// The acting user may not perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The document is not in a state that allows the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored or submitted call document is malformed.
    #[error("Invalid document: {0}")]
    Invalid(#[from] ValidationError),

    /// The call document refused the update.
    #[error("Update refused: {0}")]
    Refused(#[from] PatchError),

    /// JSON blob (description / candidate) could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The shared connection mutex was poisoned by a panicking writer.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// True when the target call has already ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StoreError::Refused(PatchError::Terminal))
    }

    /// True when an unanswered-call timeout lost the race to an accept.
    pub fn is_answered(&self) -> bool {
        matches!(self, StoreError::Refused(PatchError::AnsweredBeforeTimeout))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
