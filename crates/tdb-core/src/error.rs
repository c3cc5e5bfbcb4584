use thiserror::Error;

use crate::ConflictingFile;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Version-skew conflict raised by the commit engine (spec §4.7 step 3).
    /// Carries every file whose checkout snapshot disagrees with the
    /// current registry version.
    #[error("commit conflict: {} file(s) advanced since checkout", .conflicts.len())]
    CommitConflict { conflicts: Vec<ConflictingFile> },

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Raised by checkout materialization (spec §4.6) when the target
    /// directory already exists and is non-empty and `force` was not set.
    #[error("checkout target not empty: {0}")]
    CheckoutTargetNotEmpty(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
