//! Runtime settings for the HTTP layer.

use std::time::Duration;

/// Browser origins allowed to call `/issue` and `/verify` when none are configured.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "https://preview--robloxx-guard.lovable.app",
    "https://robloxx-guard.lovable.app",
    "http://localhost:5173",
    "http://localhost:8080",
];

/// Settings consumed by [`crate::build_router`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// CORS allow-list for the issue and verify routes. Delivery allows any origin.
    pub allowed_origins: Vec<String>,
    /// Upper bound on a single store-backed operation.
    pub store_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|o| (*o).to_owned()).collect(),
            store_timeout: Duration::from_secs(5),
        }
    }
}
