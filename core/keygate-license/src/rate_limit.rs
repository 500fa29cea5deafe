//! Per-identifier request ceilings.
//!
//! Each identifier gets a counter and a reset instant. The first request
//! after the reset instant starts a new window with a count of one; inside a
//! live window the request is admitted while the count is below the ceiling.
//! This is a reset window, not a true sliding window.
//!
//! # Memory bound
//!
//! The table is split into shards, each behind its own lock and holding at
//! most `max_entries / shards` identifiers. A new identifier arriving at a
//! full shard first evicts stale records, then the record whose window ends
//! soonest. Every `cleanup_interval` calls the whole table is swept.
//!
//! State is process-local. Restarts and replicas each start from zero, and
//! a concurrent burst can be over-admitted by a request or two.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A ceiling of `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceiling {
    pub max_requests: u32,
    pub window: Duration,
}

impl Ceiling {
    #[must_use]
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

/// Sizing of one limiter table.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Number of independently locked shards.
    pub shards: usize,
    /// Upper bound on tracked identifiers across all shards.
    pub max_entries: usize,
    /// Sweep stale records every N calls.
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            max_entries: 16_384,
            cleanup_interval: 1_000,
        }
    }
}

/// Ceilings for each operation class.
///
/// Issuance is tightest, delivery loosest: clients re-fetch payloads far
/// more often than they re-issue keys.
#[derive(Debug, Clone)]
pub struct OperationLimits {
    pub issue: Ceiling,
    pub verify: Ceiling,
    pub deliver: Ceiling,
    pub table: RateLimitConfig,
}

impl Default for OperationLimits {
    fn default() -> Self {
        Self {
            issue: Ceiling::per_minute(5),
            verify: Ceiling::per_minute(10),
            deliver: Ceiling::per_minute(20),
            table: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    count: u32,
    reset_at: DateTime<Utc>,
}

type Shard = Mutex<HashMap<String, RateLimitRecord>>;

/// In-memory reset-window rate limiter.
pub struct RateLimiter {
    shards: Box<[Shard]>,
    per_shard: usize,
    cleanup_interval: u64,
    calls: AtomicU64,
    hasher: RandomState,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let shards = config.shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            per_shard: (config.max_entries / shards).max(1),
            cleanup_interval: config.cleanup_interval.max(1),
            calls: AtomicU64::new(0),
            hasher: RandomState::new(),
            clock,
        }
    }

    /// Records a request for `identifier` and reports whether it is admitted.
    pub fn allow(&self, identifier: &str, max_requests: u32, window: Duration) -> bool {
        let now = self.clock.now();

        let calls = self.calls.fetch_add(1, Ordering::Relaxed);
        if calls > 0 && calls % self.cleanup_interval == 0 {
            let removed = self.sweep();
            tracing::debug!(calls, removed, "swept rate limiter");
        }

        let reset_at = window_end(now, window);
        let mut shard = self.shard(identifier).lock();

        if let Some(record) = shard.get_mut(identifier) {
            if now > record.reset_at {
                *record = RateLimitRecord {
                    count: 1,
                    reset_at,
                };
                return max_requests > 0;
            }
            if record.count >= max_requests {
                return false;
            }
            record.count += 1;
            return true;
        }

        if shard.len() >= self.per_shard {
            evict(&mut shard, self.per_shard, now);
        }
        shard.insert(
            identifier.to_string(),
            RateLimitRecord {
                count: 1,
                reset_at,
            },
        );
        max_requests > 0
    }

    /// Convenience wrapper over [`RateLimiter::allow`].
    pub fn allow_ceiling(&self, identifier: &str, ceiling: Ceiling) -> bool {
        self.allow(identifier, ceiling.max_requests, ceiling.window)
    }

    /// Drops every record whose window has ended. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock();
                let before = shard.len();
                shard.retain(|_, r| now <= r.reset_at);
                before - shard.len()
            })
            .sum()
    }

    /// Number of identifiers currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    fn shard(&self, identifier: &str) -> &Shard {
        let idx = (self.hasher.hash_one(identifier) as usize) % self.shards.len();
        &self.shards[idx]
    }
}

fn window_end(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_add_signed(w))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn evict(shard: &mut HashMap<String, RateLimitRecord>, cap: usize, now: DateTime<Utc>) {
    shard.retain(|_, r| now <= r.reset_at);
    if shard.len() < cap {
        return;
    }
    // Nothing stale: give up the record closest to resetting anyway.
    let soonest = shard
        .iter()
        .min_by_key(|(_, r)| r.reset_at)
        .map(|(k, _)| k.clone());
    if let Some(key) = soonest {
        shard.remove(&key);
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("shards", &self.shards.len())
            .field("per_shard", &self.per_shard)
            .field("tracked", &self.tracked())
            .finish()
    }
}
