//! HTTP API for KeyGate.
//!
//! Routes:
//! - `POST /issue` issues or re-issues a device key
//! - `GET /verify` checks a key, or whether a device holds one
//! - `GET /deliver/{scriptId}` releases a script payload as plain text
//! - `GET /health`

mod api;
mod caller;
mod config;

pub use api::{HealthResponse, IssueRequest, IssueResponse, VerifyResponse};
pub use caller::CallerAddress;
pub use config::{ServerConfig, DEFAULT_ALLOWED_ORIGINS};

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use keygate_license::KeyService;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<KeyService>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(service: KeyService, config: ServerConfig) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
        }
    }
}

const CORS_HEADERS: [HeaderName; 4] = [
    header::AUTHORIZATION,
    header::CONTENT_TYPE,
    HeaderName::from_static("x-client-info"),
    HeaderName::from_static("apikey"),
];

fn allow_listed_cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring unusable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(CORS_HEADERS)
}

fn open_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(CORS_HEADERS)
}

/// Build the HTTP API router over the given state.
pub fn build_router(state: AppState) -> Router {
    let browser = Router::new()
        .route("/issue", post(api::issue))
        .route("/verify", get(api::verify))
        .layer(allow_listed_cors(&state.config.allowed_origins));

    let delivery = Router::new()
        .route("/deliver/{script_id}", get(api::deliver))
        .layer(open_cors());

    Router::new()
        .merge(browser)
        .merge(delivery)
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
