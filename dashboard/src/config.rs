use crate::alerts::AlertThresholds;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://eu.thingsboard.cloud";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a [`Session`](crate::session::Session) needs to know up front.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST root of the platform, e.g. `https://eu.thingsboard.cloud`.
    pub base_url: String,
    /// The one device this dashboard talks to.
    pub device_id: String,
    /// Where to keep the session token after a successful login.
    pub token_path: Option<PathBuf>,
    pub http_timeout: Duration,
    pub thresholds: AlertThresholds,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            device_id: device_id.into(),
            token_path: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            thresholds: AlertThresholds::default(),
        }
    }

    pub fn rest_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// WebSocket root derived from the REST root (`https` → `wss`, `http` → `ws`).
    pub fn websocket_base(&self) -> String {
        let base = self.rest_base();
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        }
    }
}
