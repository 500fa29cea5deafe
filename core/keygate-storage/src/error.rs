//! Error types for the SQLite storage layer.

use keygate_license::StorageError;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for opening and migrating the database.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Errors raised while opening or administering the database.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The connection lock could not be taken in time.
    #[error("timed out waiting for the database connection")]
    Timeout,
}

impl From<SqliteError> for StorageError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Database(e) => classify("database", e),
            SqliteError::Timeout => StorageError::Timeout {
                operation: "database",
            },
            SqliteError::InvalidData(msg) => StorageError::Corrupt(msg),
            other => StorageError::backend("database", other),
        }
    }
}

/// Maps a driver error onto the store contract for `operation`.
pub(crate) fn classify(operation: &'static str, err: rusqlite::Error) -> StorageError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StorageError::Conflict,
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StorageError::Timeout { operation }
        }
        _ => StorageError::backend(operation, err),
    }
}
