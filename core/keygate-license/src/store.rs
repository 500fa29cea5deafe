//! Storage contract for scripts and access keys.
//!
//! The stores expose primitive operations only. Supersession ordering and
//! expiry checks belong to the services; the exceptions are
//! [`KeyStore::supersede`] and [`KeyStore::rotate`], which must be atomic so
//! that no interleaving of concurrent issuances leaves two active keys for
//! one pair, or replaces a key another issuance has just handed out.

use crate::error::{StorageError, StorageResult};
use crate::key::{AccessKey, Script};
use chrono::{DateTime, Utc};
use keygate_types::{AccessSecret, DeviceId, KeyId, ScriptId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use subtle::ConstantTimeEq;

/// Read access to scripts.
pub trait ScriptStore: Send + Sync {
    fn get_script(&self, id: &ScriptId) -> StorageResult<Option<Script>>;
}

/// The access-key relation.
pub trait KeyStore: Send + Sync {
    /// The active key for the pair, expired or not.
    fn find_active(&self, script: &ScriptId, device: &DeviceId) -> StorageResult<Option<AccessKey>>;

    /// The active key bound to `shared` whose secret equals `secret`.
    fn find_active_fallback(
        &self,
        script: &ScriptId,
        shared: &DeviceId,
        secret: &AccessSecret,
    ) -> StorageResult<Option<AccessKey>>;

    /// Deactivates every key for the pair. Returns how many changed.
    fn deactivate_all(&self, script: &ScriptId, device: &DeviceId) -> StorageResult<usize>;

    /// Stores a key as-is. Fails with [`StorageError::Conflict`] if the key
    /// is active and the pair already has an active key.
    fn insert(&self, key: AccessKey) -> StorageResult<AccessKey>;

    /// Deactivates one key. Returns false if it was already inactive or unknown.
    fn deactivate(&self, id: &KeyId) -> StorageResult<bool>;

    /// Deactivates all keys for `key`'s pair and inserts `key`, as one
    /// atomic step, unless the pair still holds an active key usable at
    /// `now`. That key is left in place and the call fails with
    /// [`StorageError::Conflict`].
    fn supersede(&self, key: AccessKey, now: DateTime<Utc>) -> StorageResult<AccessKey>;

    /// Deactivates all keys for `key`'s pair and inserts `key`, as one
    /// atomic step, usable or not.
    fn rotate(&self, key: AccessKey) -> StorageResult<AccessKey>;
}

/// Compares two secrets without short-circuiting on the first differing byte.
#[must_use]
pub fn secrets_match(a: &AccessSecret, b: &AccessSecret) -> bool {
    a.as_str().as_bytes().ct_eq(b.as_str().as_bytes()).into()
}

/// Per-operation call counters of a [`MemoryStore`].
#[derive(Debug, Default)]
pub struct StoreCalls {
    pub get_script: AtomicUsize,
    pub find_active: AtomicUsize,
    pub find_active_fallback: AtomicUsize,
    pub deactivate_all: AtomicUsize,
    pub insert: AtomicUsize,
    pub deactivate: AtomicUsize,
    pub supersede: AtomicUsize,
    pub rotate: AtomicUsize,
}

impl StoreCalls {
    /// Sum over every operation.
    #[must_use]
    pub fn total(&self) -> usize {
        [
            &self.get_script,
            &self.find_active,
            &self.find_active_fallback,
            &self.deactivate_all,
            &self.insert,
            &self.deactivate,
            &self.supersede,
            &self.rotate,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }
}

#[derive(Debug, Default)]
struct Tables {
    scripts: HashMap<ScriptId, Script>,
    keys: Vec<AccessKey>,
}

impl Tables {
    fn has_active(&self, script: &ScriptId, device: &DeviceId) -> bool {
        self.keys
            .iter()
            .any(|k| k.active && k.script_id == *script && k.device_id == *device)
    }

    fn deactivate_pair(&mut self, script: &ScriptId, device: &DeviceId) -> usize {
        let mut changed = 0;
        for k in self
            .keys
            .iter_mut()
            .filter(|k| k.active && k.script_id == *script && k.device_id == *device)
        {
            k.active = false;
            changed += 1;
        }
        changed
    }
}

/// Process-local store behind a single lock.
///
/// Every call is counted in [`MemoryStore::calls`], and the store can be
/// switched to fail all calls, which lets callers observe exactly which
/// operations a request touched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    calls: StoreCalls,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a script.
    pub fn put_script(&self, script: Script) {
        self.tables.lock().scripts.insert(script.id, script);
    }

    #[must_use]
    pub fn calls(&self) -> &StoreCalls {
        &self.calls
    }

    /// Makes every subsequent call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Every key ever stored for the pair, oldest first.
    #[must_use]
    pub fn keys_for(&self, script: &ScriptId, device: &DeviceId) -> Vec<AccessKey> {
        self.tables
            .lock()
            .keys
            .iter()
            .filter(|k| k.script_id == *script && k.device_id == *device)
            .cloned()
            .collect()
    }

    /// Rewrites the expiry of a stored key. Test hook for forcing expiry.
    pub fn set_expires_at(&self, id: &KeyId, expires_at: chrono::DateTime<chrono::Utc>) -> bool {
        let mut tables = self.tables.lock();
        match tables.keys.iter_mut().find(|k| k.id == *id) {
            Some(k) => {
                k.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    fn enter(&self, counter: &AtomicUsize, operation: &'static str) -> StorageResult<()> {
        counter.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StorageError::backend(operation, "store unavailable"));
        }
        Ok(())
    }
}

impl ScriptStore for MemoryStore {
    fn get_script(&self, id: &ScriptId) -> StorageResult<Option<Script>> {
        self.enter(&self.calls.get_script, "get_script")?;
        Ok(self.tables.lock().scripts.get(id).cloned())
    }
}

impl KeyStore for MemoryStore {
    fn find_active(&self, script: &ScriptId, device: &DeviceId) -> StorageResult<Option<AccessKey>> {
        self.enter(&self.calls.find_active, "find_active")?;
        Ok(self
            .tables
            .lock()
            .keys
            .iter()
            .find(|k| k.active && k.script_id == *script && k.device_id == *device)
            .cloned())
    }

    fn find_active_fallback(
        &self,
        script: &ScriptId,
        shared: &DeviceId,
        secret: &AccessSecret,
    ) -> StorageResult<Option<AccessKey>> {
        self.enter(&self.calls.find_active_fallback, "find_active_fallback")?;
        Ok(self
            .tables
            .lock()
            .keys
            .iter()
            .find(|k| {
                k.active
                    && k.script_id == *script
                    && k.device_id == *shared
                    && secrets_match(&k.secret, secret)
            })
            .cloned())
    }

    fn deactivate_all(&self, script: &ScriptId, device: &DeviceId) -> StorageResult<usize> {
        self.enter(&self.calls.deactivate_all, "deactivate_all")?;
        Ok(self.tables.lock().deactivate_pair(script, device))
    }

    fn insert(&self, key: AccessKey) -> StorageResult<AccessKey> {
        self.enter(&self.calls.insert, "insert")?;
        let mut tables = self.tables.lock();
        if key.active && tables.has_active(&key.script_id, &key.device_id) {
            return Err(StorageError::Conflict);
        }
        tables.keys.push(key.clone());
        Ok(key)
    }

    fn deactivate(&self, id: &KeyId) -> StorageResult<bool> {
        self.enter(&self.calls.deactivate, "deactivate")?;
        let mut tables = self.tables.lock();
        match tables.keys.iter_mut().find(|k| k.id == *id && k.active) {
            Some(k) => {
                k.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn supersede(&self, key: AccessKey, now: DateTime<Utc>) -> StorageResult<AccessKey> {
        self.enter(&self.calls.supersede, "supersede")?;
        let mut tables = self.tables.lock();
        let held = tables.keys.iter().any(|k| {
            k.script_id == key.script_id && k.device_id == key.device_id && k.is_usable_at(now)
        });
        if held {
            return Err(StorageError::Conflict);
        }
        tables.deactivate_pair(&key.script_id, &key.device_id);
        tables.keys.push(key.clone());
        Ok(key)
    }

    fn rotate(&self, key: AccessKey) -> StorageResult<AccessKey> {
        self.enter(&self.calls.rotate, "rotate")?;
        let mut tables = self.tables.lock();
        tables.deactivate_pair(&key.script_id, &key.device_id);
        tables.keys.push(key.clone());
        Ok(key)
    }
}
