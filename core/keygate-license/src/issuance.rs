//! Key issuance.
//!
//! Re-issuing within a key's validity window hands back the same key, so
//! retried requests do not churn secrets. Otherwise every older key for the
//! pair is deactivated and a fresh one takes its place in a single atomic
//! store call.

use crate::error::{KeyResult, StorageError};
use crate::key::{AccessKey, IssuedKey};
use crate::service::{log_storage, KeyService};
use keygate_types::{DeviceId, ScriptId};

impl KeyService {
    /// Issues (or re-issues) the key for `device` on `script`.
    ///
    /// `caller` is the caller's network address; it scopes the rate limit
    /// together with the device.
    ///
    /// # Errors
    ///
    /// `Validation` for malformed ids, `RateLimited` past the issuance
    /// ceiling, `NotFound` for an unknown script, `Storage` if the store fails.
    pub fn issue(&self, caller: &str, script_id: &str, device_id: &str) -> KeyResult<IssuedKey> {
        let script_id = ScriptId::parse(script_id)?;
        let device_id = DeviceId::parse(device_id)?;

        let rate_key = format!("{caller}:{device_id}");
        Self::check_rate(&self.issue_limiter, &rate_key, self.limits.issue, "issue")?;

        let script = self.load_script(&script_id)?;
        let now = self.clock.now();

        if let Some(existing) = self
            .keys
            .find_active(&script_id, &device_id)
            .map_err(|e| log_storage("find_active", &script_id, e))?
        {
            if existing.is_usable_at(now) {
                tracing::info!(script_id = %script_id, device_id = %device_id, "returning existing key");
                return Ok(IssuedKey::reused(&existing));
            }
        }

        let candidate = AccessKey::issue(&script, device_id.clone(), now);
        match self.keys.supersede(candidate, now) {
            Ok(stored) => {
                tracing::info!(
                    script_id = %script_id,
                    device_id = %device_id,
                    expires_at = %stored.expires_at,
                    "issued new key"
                );
                Ok(IssuedKey::fresh(&stored))
            }
            Err(StorageError::Conflict) => {
                // A concurrent issuance for the same pair committed first.
                let winner = self
                    .keys
                    .find_active(&script_id, &device_id)
                    .map_err(|e| log_storage("find_active", &script_id, e))?;
                match winner {
                    Some(k) if k.is_usable_at(now) => {
                        tracing::info!(script_id = %script_id, device_id = %device_id, "returning concurrently issued key");
                        Ok(IssuedKey::reused(&k))
                    }
                    _ => Err(log_storage("supersede", &script_id, StorageError::Conflict)),
                }
            }
            Err(e) => Err(log_storage("supersede", &script_id, e)),
        }
    }

    /// Issues a shared key for `script`, valid for any device that presents it.
    ///
    /// Operator-only: no rate limit, no reuse. Any earlier shared key for the
    /// script is superseded.
    ///
    /// # Errors
    ///
    /// `Validation`, `NotFound` or `Storage`.
    pub fn issue_shared(&self, script_id: &str) -> KeyResult<IssuedKey> {
        let script_id = ScriptId::parse(script_id)?;
        let script = self.load_script(&script_id)?;
        let key = AccessKey::issue(&script, DeviceId::shared(), self.clock.now());
        let stored = self
            .keys
            .rotate(key)
            .map_err(|e| log_storage("rotate", &script_id, e))?;
        tracing::info!(script_id = %script_id, expires_at = %stored.expires_at, "issued shared key");
        Ok(IssuedKey::fresh(&stored))
    }
}
