use chrono::{Duration, TimeZone, Utc};
use keygate_license::{Ceiling, ManualClock, RateLimitConfig, RateLimiter};
use std::sync::Arc;

const MINUTE: std::time::Duration = std::time::Duration::from_secs(60);

fn limiter(config: RateLimitConfig) -> (Arc<ManualClock>, RateLimiter) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    ));
    let limiter = RateLimiter::new(&config, clock.clone());
    (clock, limiter)
}

#[test]
fn five_per_minute_window_example() {
    let (clock, rl) = limiter(RateLimitConfig::default());

    for i in 1..=5 {
        assert!(rl.allow("ip", 5, MINUTE), "call {i} at t=0");
    }
    clock.advance(Duration::seconds(10));
    assert!(!rl.allow("ip", 5, MINUTE), "call 6 at t=10s");
    clock.advance(Duration::seconds(51));
    assert!(rl.allow("ip", 5, MINUTE), "call 7 at t=61s");
}

#[test]
fn window_reset_is_strictly_after_reset_instant() {
    let (clock, rl) = limiter(RateLimitConfig::default());
    assert!(rl.allow("ip", 1, MINUTE));
    clock.advance(Duration::seconds(60));
    assert!(!rl.allow("ip", 1, MINUTE));
    clock.advance(Duration::milliseconds(1));
    assert!(rl.allow("ip", 1, MINUTE));
}

#[test]
fn denied_calls_do_not_extend_the_window() {
    let (clock, rl) = limiter(RateLimitConfig::default());
    assert!(rl.allow("ip", 1, MINUTE));
    for _ in 0..50 {
        clock.advance(Duration::seconds(1));
        assert!(!rl.allow("ip", 1, MINUTE));
    }
    clock.advance(Duration::seconds(11));
    assert!(rl.allow("ip", 1, MINUTE));
}

#[test]
fn identifiers_are_independent() {
    let (_, rl) = limiter(RateLimitConfig::default());
    assert!(rl.allow("a", 1, MINUTE));
    assert!(!rl.allow("a", 1, MINUTE));
    assert!(rl.allow("b", 1, MINUTE));
}

#[test]
fn zero_ceiling_denies_everything() {
    let (_, rl) = limiter(RateLimitConfig::default());
    assert!(!rl.allow("ip", 0, MINUTE));
    assert!(!rl.allow("ip", 0, MINUTE));
}

#[test]
fn allow_ceiling_matches_allow() {
    let (_, rl) = limiter(RateLimitConfig::default());
    let c = Ceiling::per_minute(2);
    assert!(rl.allow_ceiling("ip", c));
    assert!(rl.allow_ceiling("ip", c));
    assert!(!rl.allow_ceiling("ip", c));
}

#[test]
fn table_is_bounded() {
    let (_, rl) = limiter(RateLimitConfig {
        shards: 4,
        max_entries: 64,
        cleanup_interval: 1_000_000,
    });
    for i in 0..10_000 {
        rl.allow(&format!("caller-{i}"), 5, MINUTE);
    }
    assert!(rl.tracked() <= 64, "tracked {}", rl.tracked());
}

#[test]
fn sweep_drops_only_stale_records() {
    let (clock, rl) = limiter(RateLimitConfig::default());
    rl.allow("old", 5, MINUTE);
    clock.advance(Duration::seconds(30));
    rl.allow("new", 5, MINUTE);
    clock.advance(Duration::seconds(31));

    assert_eq!(rl.sweep(), 1);
    assert_eq!(rl.tracked(), 1);
}

#[test]
fn periodic_cleanup_runs_on_interval() {
    let (clock, rl) = limiter(RateLimitConfig {
        shards: 2,
        max_entries: 1_000,
        cleanup_interval: 10,
    });
    for i in 0..5 {
        rl.allow(&format!("stale-{i}"), 5, MINUTE);
    }
    clock.advance(Duration::minutes(5));
    for _ in 0..6 {
        rl.allow("fresh", 5, MINUTE);
    }
    assert_eq!(rl.tracked(), 1);
}

#[test]
fn concurrent_callers_never_exceed_ceiling_by_much() {
    let (_, rl) = limiter(RateLimitConfig::default());
    let rl = Arc::new(rl);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let rl = Arc::clone(&rl);
            std::thread::spawn(move || (0..50).filter(|_| rl.allow("burst", 20, MINUTE)).count())
        })
        .collect();
    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 20);
}

// ── Properties ───────────────────────────────────────────────────

mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    const IDS: [&str; 3] = ["198.51.100.1", "198.51.100.2", "203.0.113.9"];

    proptest! {
        /// No identifier is ever admitted more than `max` times inside one
        /// window, and every admission a reset window allows is granted.
        #[test]
        fn admissions_never_exceed_the_ceiling(
            max in 1u32..6,
            window_secs in 1u64..120,
            calls in prop::collection::vec((0usize..IDS.len(), 0i64..40_000), 1..200),
        ) {
            let (clock, rl) = limiter(RateLimitConfig::default());
            let window = std::time::Duration::from_secs(window_secs);
            let window_ms = i64::try_from(window_secs * 1_000).unwrap();
            let mut elapsed_ms = 0i64;
            // identifier -> (window end in ms, admitted in window)
            let mut windows: HashMap<usize, (i64, u32)> = HashMap::new();

            for (id, step_ms) in calls {
                clock.advance(Duration::milliseconds(step_ms));
                elapsed_ms += step_ms;

                let admitted = rl.allow(IDS[id], max, window);
                let entry = windows.entry(id).or_insert((i64::MIN, 0));
                if elapsed_ms > entry.0 {
                    prop_assert!(admitted, "first call of a fresh window was refused");
                    *entry = (elapsed_ms + window_ms, 1);
                } else if entry.1 < max {
                    prop_assert!(admitted, "call {} of {} in window was refused", entry.1 + 1, max);
                    entry.1 += 1;
                } else {
                    prop_assert!(!admitted, "admitted beyond the ceiling of {}", max);
                }
                prop_assert!(entry.1 <= max);
            }
        }
    }
}
