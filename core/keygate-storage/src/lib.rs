//! SQLite storage layer for KeyGate.
//!
//! Provides the durable [`KeyStore`](keygate_license::KeyStore) and
//! [`ScriptStore`](keygate_license::ScriptStore) used by the server.
//!
//! # Architecture
//!
//! - One connection per store, guarded by a lock with a bounded wait
//! - WAL journal and a `busy_timeout` so cross-process lock waits are bounded too
//! - A partial unique index allows at most one active key per
//!   `(script_id, device_id)`; supersession runs in a `BEGIN IMMEDIATE`
//!   transaction, so the invariant holds even with several processes
//!   sharing one database file
//! - Schema migrations are applied on open

mod error;
mod sqlite_store;

pub use error::{SqliteError, SqliteResult};
pub use sqlite_store::{SqliteConfig, SqliteStore};
