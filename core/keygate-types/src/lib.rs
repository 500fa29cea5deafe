//! Core type definitions for KeyGate.
//!
//! This crate defines the identifier types shared by every other crate and
//! the validation rules that gate them:
//! - Script identifiers (canonical hyphenated UUID)
//! - Device identifiers (grouped uppercase token, plus the shared sentinel)
//! - Access key secrets (four groups of five uppercase alphanumerics)
//! - Key record identifiers (UUID v7)
//!
//! Parsing is the validation step: a value of one of these types has
//! already passed its shape check and can be handed to storage as-is.

mod ids;

pub use ids::{AccessSecret, DeviceId, KeyId, ScriptId, SHARED_DEVICE_ID};

/// Result type alias for validation.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Which request field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ScriptId,
    DeviceId,
    Key,
}

impl Field {
    /// Wire name of the field, as callers send it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScriptId => "scriptId",
            Self::DeviceId => "deviceId",
            Self::Key => "key",
        }
    }

    /// Human-readable label used in error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ScriptId => "script ID",
            Self::DeviceId => "device ID",
            Self::Key => "key",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A malformed identifier rejected before it reaches rate limiting or storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {} format: {reason}", .field.label())]
pub struct ValidationError {
    /// The offending field.
    pub field: Field,
    /// Short description of the rule that failed.
    pub reason: &'static str,
}

impl ValidationError {
    #[must_use]
    pub const fn new(field: Field, reason: &'static str) -> Self {
        Self { field, reason }
    }

    /// Message safe to return to the caller. Never echoes the input.
    #[must_use]
    pub fn public_message(&self) -> String {
        format!("Invalid {} format", self.field.label())
    }
}
