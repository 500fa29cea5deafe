//! Access-key lifecycle for KeyGate.
//!
//! This crate handles:
//! - Issuance of device-bound keys, with idempotent reuse and supersession
//! - Verification, including the shared-key fallback and lazy expiry
//! - The delivery gate that releases a script's payload
//! - Per-operation rate limiting
//!
//! # Design Principles
//!
//! - **Fail fast**: input is validated, then rate limited, before any store call
//! - **One active key per pair**: a new key supersedes every older one atomically
//! - **Lazy expiry**: keys are deactivated when verification meets them expired;
//!   nothing sweeps the store in the background
//! - **Opaque refusals**: a wrong key and a wrong device look the same to the caller
//!
//! # Key Format
//!
//! Keys are `XXXXX-XXXXX-XXXXX-XXXXX` over `[A-Z0-9]`, drawn from the OS
//! random source.

mod clock;
mod delivery;
mod error;
mod issuance;
mod key;
mod rate_limit;
mod service;
mod store;
mod verification;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{delivery_error_text, ERROR_MARKER};
pub use error::{Denial, KeyError, KeyResult, StorageError, StorageResult};
pub use key::{
    generate_secret, AccessKey, IssuedKey, KeyExpiry, Script, UNBOUNDED_EXPIRY_HOURS,
    UNBOUNDED_LIFETIME_YEARS,
};
pub use rate_limit::{Ceiling, OperationLimits, RateLimitConfig, RateLimiter};
pub use service::KeyService;
pub use store::{secrets_match, KeyStore, MemoryStore, ScriptStore, StoreCalls};
pub use verification::Verification;
