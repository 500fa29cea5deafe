//! The service that owns the stores, the clock and the per-operation limiters.
//!
//! Operations live in [`crate::issuance`], [`crate::verification`] and
//! [`crate::delivery`]. All of them follow the same order: validate, rate
//! limit, then touch storage.

use crate::clock::{Clock, SystemClock};
use crate::error::{KeyError, KeyResult, StorageError};
use crate::key::Script;
use crate::rate_limit::{Ceiling, OperationLimits, RateLimiter};
use crate::store::{KeyStore, ScriptStore};
use keygate_types::ScriptId;
use std::sync::Arc;

/// Key issuance, verification and delivery over a pair of stores.
pub struct KeyService {
    pub(crate) keys: Arc<dyn KeyStore>,
    pub(crate) scripts: Arc<dyn ScriptStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) limits: OperationLimits,
    pub(crate) issue_limiter: RateLimiter,
    pub(crate) verify_limiter: RateLimiter,
    pub(crate) deliver_limiter: RateLimiter,
}

impl KeyService {
    /// Creates a service on the wall clock.
    #[must_use]
    pub fn new(
        keys: Arc<dyn KeyStore>,
        scripts: Arc<dyn ScriptStore>,
        limits: OperationLimits,
    ) -> Self {
        Self::with_clock(keys, scripts, limits, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        keys: Arc<dyn KeyStore>,
        scripts: Arc<dyn ScriptStore>,
        limits: OperationLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issue_limiter: RateLimiter::new(&limits.table, Arc::clone(&clock)),
            verify_limiter: RateLimiter::new(&limits.table, Arc::clone(&clock)),
            deliver_limiter: RateLimiter::new(&limits.table, Arc::clone(&clock)),
            keys,
            scripts,
            clock,
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &OperationLimits {
        &self.limits
    }

    /// Identifiers tracked across all three limiters.
    #[must_use]
    pub fn tracked_callers(&self) -> usize {
        self.issue_limiter.tracked() + self.verify_limiter.tracked() + self.deliver_limiter.tracked()
    }

    pub(crate) fn check_rate(
        limiter: &RateLimiter,
        identifier: &str,
        ceiling: Ceiling,
        operation: &'static str,
    ) -> KeyResult<()> {
        if limiter.allow_ceiling(identifier, ceiling) {
            Ok(())
        } else {
            tracing::warn!(operation, identifier, "rate limit exceeded");
            Err(KeyError::RateLimited)
        }
    }

    pub(crate) fn load_script(&self, id: &ScriptId) -> KeyResult<Script> {
        let script = self
            .scripts
            .get_script(id)
            .map_err(|e| log_storage("get_script", id, e))?;
        script.ok_or_else(|| {
            tracing::debug!(script_id = %id, "script not found");
            KeyError::NotFound
        })
    }
}

/// Logs a store failure with its context and lifts it into a [`KeyError`].
pub(crate) fn log_storage(operation: &'static str, script: &ScriptId, err: StorageError) -> KeyError {
    tracing::error!(operation, script_id = %script, error = %err, "key store failure");
    KeyError::Storage(err)
}

impl std::fmt::Debug for KeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyService")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
