//! Key verification.
//!
//! A presented key is checked against the device's own active key first and
//! then, only if that fails, against the script's shared key. The shared
//! fallback weakens device binding on purpose: it is how keys handed out
//! outside the per-device flow are honoured.
//!
//! Expiry is lazy. A matching key found past its expiry is deactivated here,
//! so the refusal sticks even if the clock is later wound back.

use crate::error::{Denial, KeyResult};
use crate::key::{AccessKey, Script};
use crate::service::{log_storage, KeyService};
use crate::store::secrets_match;
use chrono::{DateTime, Utc};
use keygate_types::{AccessSecret, DeviceId, ScriptId};

/// Outcome of a verification that reached storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The key is good. `expires_at` is `None` when the script needs no key.
    Valid { expires_at: Option<DateTime<Utc>> },
    /// The presented key was refused.
    Denied(Denial),
    /// Existence check only: the device holds no usable key.
    NoActiveKey,
}

impl Verification {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Valid { expires_at } => *expires_at,
            _ => None,
        }
    }

    /// Machine-readable reason for a refusal.
    #[must_use]
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Valid { .. } => None,
            Self::Denied(Denial::Mismatch) => Some("mismatch"),
            Self::Denied(Denial::Expired) => Some("expired"),
            Self::NoActiveKey => Some("no_active_key"),
        }
    }
}

impl KeyService {
    /// Verifies `key` for `device` on `script`, or, when `key` is `None`,
    /// reports whether the device currently holds a usable key.
    ///
    /// # Errors
    ///
    /// `Validation` for malformed input, `RateLimited` past the verification
    /// ceiling, `NotFound` for an unknown script, `Storage` if the store fails.
    /// A wrong or expired key is not an error; it is a `Denied` outcome.
    pub fn verify(
        &self,
        caller: &str,
        script_id: &str,
        device_id: &str,
        key: Option<&str>,
    ) -> KeyResult<Verification> {
        let script_id = ScriptId::parse(script_id)?;
        let device_id = DeviceId::parse(device_id)?;
        let secret = key.map(AccessSecret::parse).transpose()?;

        Self::check_rate(&self.verify_limiter, caller, self.limits.verify, "verify")?;

        let script = self.load_script(&script_id)?;
        if !script.key_system_enabled {
            return Ok(Verification::Valid { expires_at: None });
        }

        match secret {
            Some(secret) => self.check_key(&script, &device_id, &secret),
            None => self.check_existing(&script, &device_id),
        }
    }

    /// Steps shared with delivery once input is validated and rate limited.
    pub(crate) fn check_key(
        &self,
        script: &Script,
        device: &DeviceId,
        secret: &AccessSecret,
    ) -> KeyResult<Verification> {
        let Some(key) = self.find_matching(&script.id, device, secret)? else {
            tracing::info!(script_id = %script.id, device_id = %device, "key mismatch");
            return Ok(Verification::Denied(Denial::Mismatch));
        };

        let now = self.clock.now();
        if key.is_expired_at(now) {
            self.keys
                .deactivate(&key.id)
                .map_err(|e| log_storage("deactivate", &script.id, e))?;
            tracing::info!(
                script_id = %script.id,
                device_id = %device,
                key_id = %key.id,
                "deactivated expired key"
            );
            return Ok(Verification::Denied(Denial::Expired));
        }

        tracing::debug!(script_id = %script.id, device_id = %device, shared = key.device_id.is_shared(), "key valid");
        Ok(Verification::Valid {
            expires_at: Some(key.expires_at),
        })
    }

    fn find_matching(
        &self,
        script: &ScriptId,
        device: &DeviceId,
        secret: &AccessSecret,
    ) -> KeyResult<Option<AccessKey>> {
        let exact = self
            .keys
            .find_active(script, device)
            .map_err(|e| log_storage("find_active", script, e))?
            .filter(|k| secrets_match(&k.secret, secret));
        if exact.is_some() {
            return Ok(exact);
        }
        self.keys
            .find_active_fallback(script, &DeviceId::shared(), secret)
            .map_err(|e| log_storage("find_active_fallback", script, e))
    }

    fn check_existing(&self, script: &Script, device: &DeviceId) -> KeyResult<Verification> {
        let now = self.clock.now();
        let existing = self
            .keys
            .find_active(&script.id, device)
            .map_err(|e| log_storage("find_active", &script.id, e))?;
        Ok(match existing {
            Some(k) if k.is_usable_at(now) => Verification::Valid {
                expires_at: Some(k.expires_at),
            },
            _ => Verification::NoActiveKey,
        })
    }
}
