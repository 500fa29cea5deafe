//! The SQLite-backed script and key store.

use crate::error::{classify, SqliteError, SqliteResult};
use chrono::{DateTime, Utc};
use keygate_license::{
    AccessKey, KeyExpiry, KeyStore, Script, ScriptStore, StorageError, StorageResult,
};
use keygate_types::{AccessSecret, DeviceId, KeyId, ScriptId};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scripts (
    id                 TEXT PRIMARY KEY,
    name               TEXT NOT NULL,
    key_system_enabled INTEGER NOT NULL,
    key_expiry_hours   INTEGER NOT NULL,
    payload            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS access_keys (
    id         TEXT PRIMARY KEY,
    script_id  TEXT NOT NULL REFERENCES scripts(id),
    device_id  TEXT NOT NULL,
    access_key TEXT NOT NULL,
    issued_at  TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    active     INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS access_keys_one_active
    ON access_keys(script_id, device_id) WHERE active = 1;

CREATE INDEX IF NOT EXISTS access_keys_by_secret
    ON access_keys(script_id, access_key) WHERE active = 1;
"#;

const KEY_COLUMNS: &str =
    "id, script_id, device_id, access_key, issued_at, expires_at, active";

/// Tuning for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Longest wait for a lock held by another connection or process.
    pub busy_timeout: Duration,
    /// Longest wait for this store's own connection lock.
    pub lock_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Scripts and access keys in one SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    lock_timeout: Duration,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path, config: &SqliteConfig) -> SqliteResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn, config)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?, &SqliteConfig::default())
    }

    fn init(conn: Connection, config: &SqliteConfig) -> SqliteResult<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lock_timeout: config.lock_timeout,
        })
    }

    /// Adds or replaces a script. Used by the admin command; the key
    /// services only ever read scripts.
    pub fn put_script(&self, script: &Script) -> SqliteResult<()> {
        let conn = self.lock_raw()?;
        conn.execute(
            "INSERT INTO scripts (id, name, key_system_enabled, key_expiry_hours, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                key_system_enabled = excluded.key_system_enabled,
                key_expiry_hours = excluded.key_expiry_hours,
                payload = excluded.payload",
            params![
                script.id.to_string(),
                script.name,
                script.key_system_enabled,
                script.key_expiry.as_hours(),
                script.payload,
            ],
        )?;
        Ok(())
    }

    /// All scripts, ordered by name.
    pub fn list_scripts(&self) -> SqliteResult<Vec<Script>> {
        let conn = self.lock_raw()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, key_system_enabled, key_expiry_hours, payload
             FROM scripts ORDER BY name",
        )?;
        let rows = stmt.query_map([], read_script_row)?;
        let mut scripts = Vec::new();
        for row in rows {
            scripts.push(decode_script(row?)?);
        }
        Ok(scripts)
    }

    /// Count of active keys for the pair. Should never exceed one.
    pub fn active_count(&self, script: &ScriptId, device: &DeviceId) -> SqliteResult<i64> {
        let conn = self.lock_raw()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM access_keys
             WHERE script_id = ?1 AND device_id = ?2 AND active = 1",
            params![script.to_string(), device.as_str()],
            |r| r.get(0),
        )?)
    }

    fn lock_raw(&self) -> SqliteResult<MutexGuard<'_, Connection>> {
        self.conn
            .try_lock_for(self.lock_timeout)
            .ok_or(SqliteError::Timeout)
    }

    fn lock(&self, operation: &'static str) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .try_lock_for(self.lock_timeout)
            .ok_or(StorageError::Timeout { operation })
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

fn migrate(conn: &Connection) -> SqliteResult<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(SqliteError::Migration(format!(
            "database schema version {version} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

type ScriptRow = (String, String, bool, i64, String);

fn read_script_row(row: &Row<'_>) -> rusqlite::Result<ScriptRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_script((id, name, enabled, hours, payload): ScriptRow) -> SqliteResult<Script> {
    let id = ScriptId::parse(&id)
        .map_err(|e| SqliteError::InvalidData(format!("script id: {e}")))?;
    let key_expiry = KeyExpiry::from_hours(hours)
        .ok_or_else(|| SqliteError::InvalidData(format!("key_expiry_hours {hours}")))?;
    Ok(Script {
        id,
        name,
        key_system_enabled: enabled,
        key_expiry,
        payload,
    })
}

type KeyRow = (String, String, String, String, String, String, bool);

fn read_key_row(row: &Row<'_>) -> rusqlite::Result<KeyRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_time(field: &str, s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("{field}: {e}")))
}

fn decode_key(
    (id, script_id, device_id, secret, issued_at, expires_at, active): KeyRow,
) -> StorageResult<AccessKey> {
    Ok(AccessKey {
        id: KeyId::parse(&id).map_err(|e| StorageError::Corrupt(format!("key id: {e}")))?,
        script_id: ScriptId::parse(&script_id)
            .map_err(|e| StorageError::Corrupt(format!("script id: {e}")))?,
        device_id: DeviceId::from_stored(device_id),
        secret: AccessSecret::parse(&secret)
            .map_err(|e| StorageError::Corrupt(format!("access key: {e}")))?,
        issued_at: decode_time("issued_at", &issued_at)?,
        expires_at: decode_time("expires_at", &expires_at)?,
        active,
    })
}

fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn insert_key(conn: &Connection, key: &AccessKey) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO access_keys (id, script_id, device_id, access_key, issued_at, expires_at, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            key.id.to_string(),
            key.script_id.to_string(),
            key.device_id.as_str(),
            key.secret.as_str(),
            encode_time(&key.issued_at),
            encode_time(&key.expires_at),
            key.active,
        ],
    )
}

fn deactivate_pair(conn: &Connection, script: &ScriptId, device: &DeviceId) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE access_keys SET active = 0
         WHERE script_id = ?1 AND device_id = ?2 AND active = 1",
        params![script.to_string(), device.as_str()],
    )
}

fn query_key(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> StorageResult<Option<AccessKey>> {
    let row = conn
        .query_row(sql, args, read_key_row)
        .optional()
        .map_err(|e| classify(operation, e))?;
    row.map(decode_key).transpose()
}

impl ScriptStore for SqliteStore {
    fn get_script(&self, id: &ScriptId) -> StorageResult<Option<Script>> {
        let conn = self.lock("get_script")?;
        let row = conn
            .query_row(
                "SELECT id, name, key_system_enabled, key_expiry_hours, payload
                 FROM scripts WHERE id = ?1",
                params![id.to_string()],
                read_script_row,
            )
            .optional()
            .map_err(|e| classify("get_script", e))?;
        row.map(decode_script)
            .transpose()
            .map_err(StorageError::from)
    }
}

impl KeyStore for SqliteStore {
    fn find_active(&self, script: &ScriptId, device: &DeviceId) -> StorageResult<Option<AccessKey>> {
        let conn = self.lock("find_active")?;
        query_key(
            &conn,
            "find_active",
            &format!(
                "SELECT {KEY_COLUMNS} FROM access_keys
                 WHERE script_id = ?1 AND device_id = ?2 AND active = 1"
            ),
            params![script.to_string(), device.as_str()],
        )
    }

    fn find_active_fallback(
        &self,
        script: &ScriptId,
        shared: &DeviceId,
        secret: &AccessSecret,
    ) -> StorageResult<Option<AccessKey>> {
        let conn = self.lock("find_active_fallback")?;
        query_key(
            &conn,
            "find_active_fallback",
            &format!(
                "SELECT {KEY_COLUMNS} FROM access_keys
                 WHERE script_id = ?1 AND device_id = ?2 AND access_key = ?3 AND active = 1"
            ),
            params![script.to_string(), shared.as_str(), secret.as_str()],
        )
    }

    fn deactivate_all(&self, script: &ScriptId, device: &DeviceId) -> StorageResult<usize> {
        let conn = self.lock("deactivate_all")?;
        deactivate_pair(&conn, script, device).map_err(|e| classify("deactivate_all", e))
    }

    fn insert(&self, key: AccessKey) -> StorageResult<AccessKey> {
        let conn = self.lock("insert")?;
        insert_key(&conn, &key).map_err(|e| classify("insert", e))?;
        Ok(key)
    }

    fn deactivate(&self, id: &KeyId) -> StorageResult<bool> {
        let conn = self.lock("deactivate")?;
        let changed = conn
            .execute(
                "UPDATE access_keys SET active = 0 WHERE id = ?1 AND active = 1",
                params![id.to_string()],
            )
            .map_err(|e| classify("deactivate", e))?;
        Ok(changed > 0)
    }

    fn supersede(&self, key: AccessKey, now: DateTime<Utc>) -> StorageResult<AccessKey> {
        let mut conn = self.lock("supersede")?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| classify("supersede", e))?;
        let current = tx
            .query_row(
                "SELECT expires_at FROM access_keys
                 WHERE script_id = ?1 AND device_id = ?2 AND active = 1",
                params![key.script_id.to_string(), key.device_id.as_str()],
                |r| r.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| classify("supersede", e))?;
        if let Some(expires_at) = current {
            if decode_time("expires_at", &expires_at)? >= now {
                tracing::debug!(
                    script_id = %key.script_id,
                    device_id = %key.device_id,
                    "pair already holds a usable key"
                );
                return Err(StorageError::Conflict);
            }
        }
        let replaced = deactivate_pair(&tx, &key.script_id, &key.device_id)
            .map_err(|e| classify("supersede", e))?;
        insert_key(&tx, &key).map_err(|e| classify("supersede", e))?;
        tx.commit().map_err(|e| classify("supersede", e))?;
        tracing::debug!(
            script_id = %key.script_id,
            device_id = %key.device_id,
            replaced,
            "superseded keys"
        );
        Ok(key)
    }

    fn rotate(&self, key: AccessKey) -> StorageResult<AccessKey> {
        let mut conn = self.lock("rotate")?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| classify("rotate", e))?;
        let replaced = deactivate_pair(&tx, &key.script_id, &key.device_id)
            .map_err(|e| classify("rotate", e))?;
        insert_key(&tx, &key).map_err(|e| classify("rotate", e))?;
        tx.commit().map_err(|e| classify("rotate", e))?;
        tracing::debug!(script_id = %key.script_id, device_id = %key.device_id, replaced, "rotated keys");
        Ok(key)
    }
}
