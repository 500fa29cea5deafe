//! Shared test helpers for key lifecycle tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use keygate_license::{
    Clock, KeyExpiry, KeyService, ManualClock, MemoryStore, OperationLimits, Script,
};
use keygate_types::ScriptId;
use std::sync::Arc;

pub const SCRIPT_ID: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";
pub const OPEN_SCRIPT_ID: &str = "9b2e6c1a-0d3f-4e8b-a7c5-1f2d3e4a5b6c";
pub const UNBOUNDED_SCRIPT_ID: &str = "5a4b3c2d-1e0f-4a9b-8c7d-6e5f4a3b2c1d";
pub const MISSING_SCRIPT_ID: &str = "00000000-0000-4000-8000-000000000000";

pub const DEVICE_A: &str = "AB12-CD34-EF56-7890";
pub const DEVICE_B: &str = "ZZ99-YY88-XX77-WW66";
pub const CALLER: &str = "203.0.113.7";

pub const PAYLOAD: &str = "print('protected')";

/// A service over a fresh memory store and a clock pinned at a fixed instant.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub service: KeyService,
}

impl Fixture {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub fn script(id: &str, key_system_enabled: bool, key_expiry: KeyExpiry) -> Script {
    Script {
        id: ScriptId::parse(id).unwrap(),
        name: "fixture".into(),
        key_system_enabled,
        key_expiry,
        payload: PAYLOAD.into(),
    }
}

pub fn fixture() -> Fixture {
    fixture_with_limits(OperationLimits::default())
}

pub fn fixture_with_limits(limits: OperationLimits) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.put_script(script(SCRIPT_ID, true, KeyExpiry::Hours(24)));
    store.put_script(script(OPEN_SCRIPT_ID, false, KeyExpiry::Hours(24)));
    store.put_script(script(UNBOUNDED_SCRIPT_ID, true, KeyExpiry::Unbounded));

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
    ));
    let service = KeyService::with_clock(store.clone(), store.clone(), limits, clock.clone());
    Fixture {
        store,
        clock,
        service,
    }
}

/// Limits high enough that no lifecycle test trips them by accident.
pub fn generous_limits() -> OperationLimits {
    let mut limits = OperationLimits::default();
    limits.issue.max_requests = 1_000;
    limits.verify.max_requests = 1_000;
    limits.deliver.max_requests = 1_000;
    limits
}
