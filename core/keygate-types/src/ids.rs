//! Identifier types used throughout the KeyGate core.
//!
//! Every externally supplied identifier is parsed into one of these types
//! before anything else happens to it.

use crate::{Field, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reserved device id that binds a key to no particular device.
///
/// It lies outside the device-id charset, so no client can obtain it
/// through [`DeviceId::parse`].
pub const SHARED_DEVICE_ID: &str = "*";

const DEVICE_GROUPS: usize = 4;
const DEVICE_GROUP_LEN: usize = 4;
const SECRET_GROUPS: usize = 4;
const SECRET_GROUP_LEN: usize = 5;

/// Checks `s` against `groups` hyphen-separated runs of `group_len`
/// uppercase ASCII letters or digits.
fn is_grouped_token(s: &str, groups: usize, group_len: usize) -> bool {
    if s.len() != groups * group_len + (groups - 1) {
        return false;
    }
    let mut count = 0;
    for part in s.split('-') {
        count += 1;
        if part.len() != group_len
            || !part
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return false;
        }
    }
    count == groups
}

/// Identifier of a protected script.
///
/// Only the canonical hyphenated form (`8-4-4-4-12` hex digits) is accepted;
/// braced, URN and simple forms are rejected even though they name valid UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(Uuid);

impl ScriptId {
    /// Creates a new random script ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a script ID, rejecting anything but the hyphenated UUID shape.
    pub fn parse(s: &str) -> ValidationResult<Self> {
        if s.len() != 36 {
            return Err(ValidationError::new(Field::ScriptId, "expected 36 characters"));
        }
        let shaped = s.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        });
        if !shaped {
            return Err(ValidationError::new(
                Field::ScriptId,
                "expected hyphenated hex groups",
            ));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ValidationError::new(Field::ScriptId, "not a UUID"))
    }
}

impl Default for ScriptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ScriptId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identifier of a stored access key record.
/// Uses UUID v7 so records sort by issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(Uuid);

impl KeyId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for KeyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the calling hardware or runtime installation.
///
/// The accepted format is `XXXX-XXXX-XXXX-XXXX` over `[A-Z0-9]`. The one
/// exception is the shared sentinel, which can only be built through
/// [`DeviceId::shared`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Parses a client-supplied device ID.
    pub fn parse(s: &str) -> ValidationResult<Self> {
        if is_grouped_token(s, DEVICE_GROUPS, DEVICE_GROUP_LEN) {
            Ok(Self(s.to_string()))
        } else {
            Err(ValidationError::new(
                Field::DeviceId,
                "expected XXXX-XXXX-XXXX-XXXX (A-Z, 0-9)",
            ))
        }
    }

    /// The reserved device that shared/embedded keys are bound to.
    #[must_use]
    pub fn shared() -> Self {
        Self(SHARED_DEVICE_ID.to_string())
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.0 == SHARED_DEVICE_ID
    }

    /// Rebuilds a device ID read back from trusted storage without re-checking it.
    #[must_use]
    pub fn from_stored(s: String) -> Self {
        Self(s)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The secret half of an access key, `XXXXX-XXXXX-XXXXX-XXXXX`.
///
/// `Debug` is redacted so secrets never end up in logs by accident.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessSecret(String);

impl AccessSecret {
    /// Number of meaningful characters in a secret.
    pub const CHARS: usize = SECRET_GROUPS * SECRET_GROUP_LEN;

    /// Parses a presented key.
    pub fn parse(s: &str) -> ValidationResult<Self> {
        if is_grouped_token(s, SECRET_GROUPS, SECRET_GROUP_LEN) {
            Ok(Self(s.to_string()))
        } else {
            Err(ValidationError::new(
                Field::Key,
                "expected XXXXX-XXXXX-XXXXX-XXXXX (A-Z, 0-9)",
            ))
        }
    }

    /// Builds a secret from 20 already-drawn characters, inserting separators.
    pub fn from_chars(chars: &[u8; Self::CHARS]) -> ValidationResult<Self> {
        let groups: Vec<&str> = chars
            .chunks(SECRET_GROUP_LEN)
            .map(|c| std::str::from_utf8(c).unwrap_or(""))
            .collect();
        Self::parse(&groups.join("-"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for AccessSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessSecret([REDACTED])")
    }
}

impl FromStr for AccessSecret {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
