//! Shared helpers for HTTP API tests.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use keygate_license::{KeyExpiry, KeyService, ManualClock, MemoryStore, OperationLimits, Script};
use keygate_server::{build_router, AppState, ServerConfig};
use keygate_types::ScriptId;
use std::net::SocketAddr;
use std::sync::Arc;

pub const SCRIPT_ID: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";
pub const OPEN_SCRIPT_ID: &str = "9b2e6c1a-0d3f-4e8b-a7c5-1f2d3e4a5b6c";
pub const MISSING_SCRIPT_ID: &str = "00000000-0000-4000-8000-000000000000";
pub const DEVICE: &str = "AB12-CD34-EF56-7890";
pub const OTHER_DEVICE: &str = "ZZ99-YY88-XX77-WW66";
pub const PAYLOAD: &str = "print('protected')";
pub const ALLOWED_ORIGIN: &str = "http://localhost:5173";

pub struct TestServer {
    pub base: String,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn script(id: &str, key_system_enabled: bool) -> Script {
    Script {
        id: ScriptId::parse(id).unwrap(),
        name: "fixture".into(),
        key_system_enabled,
        key_expiry: KeyExpiry::Hours(24),
        payload: PAYLOAD.into(),
    }
}

/// Spin up the HTTP server on an OS-assigned port over a memory store.
pub async fn spawn_test_server() -> TestServer {
    spawn_with_limits(OperationLimits::default()).await
}

pub async fn spawn_with_limits(limits: OperationLimits) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    store.put_script(script(SCRIPT_ID, true));
    store.put_script(script(OPEN_SCRIPT_ID, false));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
    ));
    let service = KeyService::with_clock(store.clone(), store.clone(), limits, clock.clone());
    let base = serve(AppState::new(service, ServerConfig::default())).await;
    TestServer { base, store, clock }
}

pub async fn serve(state: AppState) -> String {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

pub async fn issue(base: &str, script_id: &str, device_id: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/issue", base))
        .json(&serde_json::json!({ "scriptId": script_id, "deviceId": device_id }))
        .send()
        .await
        .unwrap()
}
