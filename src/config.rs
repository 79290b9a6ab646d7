//! Endpoint and process configuration.
//!
//! The remote endpoint is a single URL. The sentinel
//! [`UNCONFIGURED_SENTINEL`] (or an empty value) means "not configured" and
//! disables every remote call that checks configuration. A URL persisted in
//! `local_settings` (category `endpoint`) overrides the environment.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::db;

/// Placeholder value meaning the endpoint has not been set up.
pub const UNCONFIGURED_SENTINEL: &str = "YOUR_WEB_APP_URL_HERE";

/// Environment variable holding the endpoint URL.
pub const ENV_WEB_APP_URL: &str = "STOCKROOM_WEB_APP_URL";

/// Environment variable overriding the data directory.
pub const ENV_DATA_DIR: &str = "STOCKROOM_DATA_DIR";

const ENDPOINT_CATEGORY: &str = "endpoint";
const KEY_WEB_APP_URL: &str = "web_app_url";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise an endpoint URL:
/// - trim whitespace
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
///
/// Empty input and the sentinel are returned unchanged.
pub fn normalize_endpoint_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() || url == UNCONFIGURED_SENTINEL {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// The remote spreadsheet endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    web_app_url: String,
}

impl EndpointConfig {
    pub fn new(web_app_url: &str) -> Self {
        Self {
            web_app_url: normalize_endpoint_url(web_app_url),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            web_app_url: UNCONFIGURED_SENTINEL.to_string(),
        }
    }

    /// Read [`ENV_WEB_APP_URL`]; absent means unconfigured.
    pub fn from_env() -> Self {
        match std::env::var(ENV_WEB_APP_URL) {
            Ok(url) => Self::new(&url),
            Err(_) => Self::unconfigured(),
        }
    }

    /// Resolve the endpoint: a persisted override wins over `fallback`.
    pub fn resolve(db: &db::DbState, fallback: Self) -> Self {
        let stored = match db.conn.lock() {
            Ok(conn) => db::get_setting(&conn, ENDPOINT_CATEGORY, KEY_WEB_APP_URL),
            Err(e) => {
                warn!(error = %e, "endpoint override unreadable, using fallback");
                None
            }
        };
        match stored {
            Some(url) if !url.trim().is_empty() => {
                info!("Using persisted endpoint override");
                Self::new(&url)
            }
            _ => fallback,
        }
    }

    /// Persist this endpoint as the override used by [`EndpointConfig::resolve`].
    pub fn persist(&self, db: &db::DbState) -> Result<(), String> {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        db::set_setting(&conn, ENDPOINT_CATEGORY, KEY_WEB_APP_URL, &self.web_app_url)
    }

    /// Remove a persisted override.
    pub fn clear_persisted(db: &db::DbState) -> Result<(), String> {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        db::delete_setting(&conn, ENDPOINT_CATEGORY, KEY_WEB_APP_URL)
    }

    pub fn is_configured(&self) -> bool {
        !self.web_app_url.is_empty() && self.web_app_url != UNCONFIGURED_SENTINEL
    }

    pub fn web_app_url(&self) -> &str {
        &self.web_app_url
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::unconfigured()
    }
}

// ---------------------------------------------------------------------------
// Retry queue
// ---------------------------------------------------------------------------

/// Timing for the background retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Delay before the catch-up drain after `start()`.
    pub initial_delay: Duration,
    /// Repeat interval after the catch-up drain; `None` drains once.
    pub interval: Option<Duration>,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            interval: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// Process configuration
// ---------------------------------------------------------------------------

/// Everything needed to open a [`crate::Stockroom`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    pub data_dir: PathBuf,
    pub queue: QueueConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());
        Self {
            endpoint: EndpointConfig::from_env(),
            data_dir,
            queue: QueueConfig::default(),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join("stockroom")
}
