//! Error types for the key lifecycle.

use keygate_types::ValidationError;
use thiserror::Error;

/// Why a presented key was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// No active key matches the script, device and secret.
    /// Deliberately does not say which of the three was wrong.
    Mismatch,
    /// The key matched but its expiry has passed. It is now deactivated.
    Expired,
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mismatch => f.write_str("invalid key or device mismatch"),
            Self::Expired => f.write_str("key expired"),
        }
    }
}

/// Failures raised by a key store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation.
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// The operation did not finish within its time bound.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// A write would have left two active keys for one (script, device) pair.
    #[error("active key already exists for this script and device")]
    Conflict,

    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn backend(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            message: err.to_string(),
        }
    }
}

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors returned by issuance, verification and delivery.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Malformed script id, device id or key.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Unknown script.
    #[error("script not found")]
    NotFound,

    /// The caller exceeded the ceiling for this operation.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Key/device mismatch or expired key.
    #[error("{0}")]
    Unauthorized(Denial),

    /// Backing store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl KeyError {
    /// HTTP status the error maps to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::Unauthorized(_) => 401,
            Self::Storage(_) => 500,
        }
    }

    /// Message safe to show the caller. Storage details stay server-side.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(e) => e.public_message(),
            Self::NotFound => "Script not found".to_string(),
            Self::RateLimited => "Rate limit exceeded. Please try again later.".to_string(),
            Self::Unauthorized(Denial::Mismatch) => "Invalid key or device mismatch".to_string(),
            Self::Unauthorized(Denial::Expired) => "Key expired".to_string(),
            Self::Storage(_) => "Server error".to_string(),
        }
    }
}

/// Result type for key operations.
pub type KeyResult<T> = Result<T, KeyError>;
