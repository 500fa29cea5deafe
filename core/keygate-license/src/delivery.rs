//! The delivery gate: release a script's payload or explain why not.
//!
//! The natural client is an unattended runtime fetching over plain HTTP, so
//! refusals are plain text starting with [`ERROR_MARKER`]. Clients treat any
//! body beginning with the marker as fatal and show it to their user.

use crate::error::{Denial, KeyError, KeyResult};
use crate::service::KeyService;
use crate::verification::Verification;
use keygate_types::{AccessSecret, DeviceId, Field, ScriptId, ValidationError};

/// Prefix of every textual delivery error.
pub const ERROR_MARKER: &str = "-- Error: ";

/// Renders `err` as a delivery body. Never includes secrets or store detail.
#[must_use]
pub fn delivery_error_text(err: &KeyError) -> String {
    format!("{ERROR_MARKER}{}", err.public_message())
}

impl KeyService {
    /// Returns the payload of `script_id` if the caller may have it.
    ///
    /// Scripts without the key system deliver unconditionally. Otherwise
    /// both `device_id` and `key` must be present, well-formed and valid.
    ///
    /// # Errors
    ///
    /// `Validation` (malformed or missing input), `RateLimited`, `NotFound`,
    /// `Unauthorized` (mismatch or expired), `Storage`.
    pub fn deliver(
        &self,
        caller: &str,
        script_id: &str,
        device_id: Option<&str>,
        key: Option<&str>,
    ) -> KeyResult<String> {
        let script_id = ScriptId::parse(script_id)?;
        Self::check_rate(&self.deliver_limiter, caller, self.limits.deliver, "deliver")?;

        let script = self.load_script(&script_id)?;
        if !script.key_system_enabled {
            tracing::info!(script_id = %script_id, "key system disabled, delivering");
            return Ok(script.payload);
        }

        let device = device_id
            .ok_or(ValidationError::new(Field::DeviceId, "missing"))
            .and_then(DeviceId::parse)?;
        let secret = key
            .ok_or(ValidationError::new(Field::Key, "missing"))
            .and_then(AccessSecret::parse)?;

        match self.check_key(&script, &device, &secret)? {
            Verification::Valid { .. } => {
                tracing::info!(script_id = %script_id, device_id = %device, "delivering payload");
                Ok(script.payload)
            }
            Verification::Denied(denial) => Err(KeyError::Unauthorized(denial)),
            Verification::NoActiveKey => Err(KeyError::Unauthorized(Denial::Mismatch)),
        }
    }
}
