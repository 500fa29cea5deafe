mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{script, SCRIPT_ID};
use keygate_license::{
    generate_secret, secrets_match, AccessKey, KeyExpiry, UNBOUNDED_EXPIRY_HOURS,
};
use keygate_types::{AccessSecret, DeviceId};
use std::collections::HashSet;

// ── KeyExpiry ────────────────────────────────────────────────────

#[test]
fn from_hours_decodes_sentinel_and_positive() {
    assert_eq!(KeyExpiry::from_hours(-1), Some(KeyExpiry::Unbounded));
    assert_eq!(KeyExpiry::from_hours(24), Some(KeyExpiry::Hours(24)));
    assert_eq!(KeyExpiry::from_hours(0), None);
    assert_eq!(KeyExpiry::from_hours(-5), None);
    assert_eq!(KeyExpiry::from_hours(i64::MAX), None);
}

#[test]
fn as_hours_roundtrips() {
    for e in [KeyExpiry::Hours(1), KeyExpiry::Hours(720), KeyExpiry::Unbounded] {
        assert_eq!(KeyExpiry::from_hours(e.as_hours()), Some(e));
    }
    assert_eq!(KeyExpiry::Unbounded.as_hours(), UNBOUNDED_EXPIRY_HOURS);
}

#[test]
fn hours_expiry_adds_hours() {
    let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    assert_eq!(KeyExpiry::Hours(48).expires_at(t), t + Duration::hours(48));
}

#[test]
fn unbounded_expiry_is_one_hundred_years() {
    let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    assert_eq!(
        KeyExpiry::Unbounded.expires_at(t),
        Utc.with_ymd_and_hms(2125, 6, 1, 0, 0, 0).unwrap()
    );
}

// ── AccessKey ────────────────────────────────────────────────────

#[test]
fn issue_computes_expiry_once() {
    let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let s = script(SCRIPT_ID, true, KeyExpiry::Hours(12));
    let key = AccessKey::issue(&s, DeviceId::parse("AAAA-BBBB-CCCC-DDDD").unwrap(), t);

    assert!(key.active);
    assert_eq!(key.issued_at, t);
    assert_eq!(key.expires_at, t + Duration::hours(12));
    assert!(key.is_usable_at(t + Duration::hours(12)));
    assert!(key.is_expired_at(t + Duration::hours(12) + Duration::seconds(1)));
}

#[test]
fn inactive_key_is_not_usable() {
    let t = Utc::now();
    let s = script(SCRIPT_ID, true, KeyExpiry::Unbounded);
    let mut key = AccessKey::issue(&s, DeviceId::shared(), t);
    key.active = false;
    assert!(!key.is_usable_at(t));
}

// ── Secrets ──────────────────────────────────────────────────────

#[test]
fn generated_secrets_match_template() {
    for _ in 0..200 {
        let s = generate_secret();
        assert!(AccessSecret::parse(s.as_str()).is_ok());
    }
}

#[test]
fn generated_secrets_do_not_repeat() {
    let seen: HashSet<String> = (0..1_000).map(|_| generate_secret().into_string()).collect();
    assert_eq!(seen.len(), 1_000);
}

#[test]
fn secrets_match_compares_full_value() {
    let a = AccessSecret::parse("ABCDE-12345-FGHIJ-67890").unwrap();
    let b = AccessSecret::parse("ABCDE-12345-FGHIJ-67890").unwrap();
    let c = AccessSecret::parse("ABCDE-12345-FGHIJ-67891").unwrap();
    assert!(secrets_match(&a, &b));
    assert!(!secrets_match(&a, &c));
}
