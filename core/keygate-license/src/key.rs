//! Scripts, access keys and their expiry rules.
//!
//! A key is issued for one `(script, device)` pair and carries its expiry
//! from birth: `expires_at` is computed once, from the script's
//! [`KeyExpiry`], and never recomputed.
//!
//! Secrets are 20 characters drawn uniformly from `[A-Z0-9]` with the OS
//! CSPRNG (about 103 bits), rendered as `XXXXX-XXXXX-XXXXX-XXXXX`.

use chrono::{DateTime, Duration, Months, Utc};
use keygate_types::{AccessSecret, DeviceId, KeyId, ScriptId};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Lifetime given to keys of scripts whose expiry is unbounded.
pub const UNBOUNDED_LIFETIME_YEARS: u32 = 100;

/// Stored encoding of [`KeyExpiry::Unbounded`].
pub const UNBOUNDED_EXPIRY_HOURS: i64 = -1;

const SECRET_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// How long keys issued for a script stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyExpiry {
    /// Valid for this many hours after issuance. Always positive.
    Hours(u32),
    /// Operationally permanent.
    Unbounded,
}

impl KeyExpiry {
    /// Decodes the stored hour count. `-1` means unbounded; zero and other
    /// negatives are rejected.
    #[must_use]
    pub fn from_hours(hours: i64) -> Option<Self> {
        if hours == UNBOUNDED_EXPIRY_HOURS {
            return Some(Self::Unbounded);
        }
        u32::try_from(hours).ok().filter(|h| *h > 0).map(Self::Hours)
    }

    /// Stored hour count.
    #[must_use]
    pub fn as_hours(&self) -> i64 {
        match self {
            Self::Hours(h) => i64::from(*h),
            Self::Unbounded => UNBOUNDED_EXPIRY_HOURS,
        }
    }

    /// Expiry of a key issued at `issued_at`.
    #[must_use]
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Hours(h) => issued_at + Duration::hours(i64::from(*h)),
            Self::Unbounded => issued_at
                .checked_add_months(Months::new(UNBOUNDED_LIFETIME_YEARS * 12))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// A protected script. Written by the upload workflow, read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    /// When false the payload is delivered without any key.
    pub key_system_enabled: bool,
    pub key_expiry: KeyExpiry,
    /// The content released on successful delivery.
    pub payload: String,
}

/// One issued access key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: KeyId,
    pub script_id: ScriptId,
    pub device_id: DeviceId,
    pub secret: AccessSecret,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl AccessKey {
    /// Builds a fresh active key for `device` with a newly drawn secret.
    #[must_use]
    pub fn issue(script: &Script, device: DeviceId, now: DateTime<Utc>) -> Self {
        Self {
            id: KeyId::new(),
            script_id: script.id,
            device_id: device,
            secret: generate_secret(),
            issued_at: now,
            expires_at: script.key_expiry.expires_at(now),
            active: true,
        }
    }

    /// Strictly after `expires_at`; a key is still good at its expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Active and not expired.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }
}

/// The outcome of a successful issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedKey {
    pub key: AccessSecret,
    pub expires_at: DateTime<Utc>,
    /// True when an existing key was handed back instead of minting one.
    pub reused: bool,
}

impl IssuedKey {
    pub(crate) fn fresh(key: &AccessKey) -> Self {
        Self {
            key: key.secret.clone(),
            expires_at: key.expires_at,
            reused: false,
        }
    }

    pub(crate) fn reused(key: &AccessKey) -> Self {
        Self {
            reused: true,
            ..Self::fresh(key)
        }
    }
}

/// Draws a new secret from the OS random source.
#[must_use]
pub fn generate_secret() -> AccessSecret {
    let mut chars = [0u8; AccessSecret::CHARS];
    for c in &mut chars {
        *c = SECRET_ALPHABET[OsRng.gen_range(0..SECRET_ALPHABET.len())];
    }
    match AccessSecret::from_chars(&chars) {
        Ok(secret) => secret,
        // Every byte comes from the secret alphabet, so the template always matches.
        Err(e) => unreachable!("generated secret failed validation: {e}"),
    }
}
