//! Stockroom - inventory and stock-request client.
//!
//! Talks to a single remote web endpoint (a spreadsheet-backed store) for
//! item, user and stock-request operations, keeps a local-first account
//! cache, and replays password resets and registration mirrors through a
//! durable retry queue. Loading and toast feedback goes through the
//! [`Indicator`] trait.

use anyhow::{anyhow, Context};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod config;
mod data_helpers;
mod db;
mod diagnostics;
mod indicator;
mod queue;
mod remote;
#[cfg(test)]
mod testing;
mod transport;
mod users;

pub use auth::{
    Registration, EMAIL_IN_USE, INVALID_CREDENTIALS, LOGIN_SUCCESSFUL, REGISTRATION_SUCCESSFUL,
};
pub use config::{
    normalize_endpoint_url, AppConfig, EndpointConfig, QueueConfig, ENV_DATA_DIR,
    ENV_WEB_APP_URL, UNCONFIGURED_SENTINEL,
};
pub use db::DbState;
pub use diagnostics::{get_about_info, HealthReport, MAX_LOG_FILES};
pub use indicator::{
    Indicator, LoadingGuard, LoadingOverlay, NoopIndicator, OverlayView, ShowOptions,
    AUTO_HIDE_AFTER, DEFAULT_SHOW_DELAY, DEFAULT_TOAST_DURATION,
};
pub use queue::{
    DrainOutcome, DrainReport, ProcessorState, QueueAction, QueueItem, QueueStatus, SyncQueue,
    MAX_ATTEMPTS,
};
pub use remote::{ApiResponse, CallOptions, RemoteClient, ResponsePolicy, UserProfile};
pub use transport::{
    HttpMethod, HttpTransport, RawResponse, RemoteRequest, Transport, TransportError,
    TransportFuture,
};
pub use users::LocalUser;

// ============================================================================
// Logging
// ============================================================================

/// Install console and daily rolling file logging under `log_dir`.
///
/// The filter comes from `RUST_LOG`, defaulting to
/// `info,stockroom_lib=debug`. Keep the returned guard alive; dropping it
/// flushes and closes the file writer.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockroom_lib=debug"));

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    diagnostics::prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(guard)
}

// ============================================================================
// Application assembly
// ============================================================================

/// One client session: local store, remote client and retry queue.
#[derive(Clone)]
pub struct Stockroom {
    db: Arc<DbState>,
    remote: RemoteClient,
    queue: SyncQueue,
}

impl Stockroom {
    /// Open the on-disk store under `config.data_dir` and wire the HTTP
    /// transport to `indicator`. A persisted endpoint override wins over
    /// `config.endpoint`.
    pub fn open(config: &AppConfig, indicator: Arc<dyn Indicator>) -> anyhow::Result<Self> {
        let db = db::init(&config.data_dir)
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("open local store in {}", config.data_dir.display()))?;
        let endpoint = EndpointConfig::resolve(&db, config.endpoint.clone());
        if !endpoint.is_configured() {
            tracing::warn!("Remote endpoint not configured, running local-only");
        }

        let transport = HttpTransport::new()
            .map_err(|e| anyhow!(e))
            .context("build HTTP transport")?;
        let remote = RemoteClient::new(endpoint, Arc::new(transport), indicator);

        info!("Starting Stockroom v{}", env!("CARGO_PKG_VERSION"));
        Ok(Self::with_parts(Arc::new(db), remote, config.queue))
    }

    /// Assemble from already-built parts.
    pub fn with_parts(db: Arc<DbState>, remote: RemoteClient, queue: QueueConfig) -> Self {
        let queue = SyncQueue::new(db.clone(), remote.clone(), queue);
        Self { db, remote, queue }
    }

    pub fn db(&self) -> &DbState {
        &self.db
    }

    pub fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn register_user(&self, registration: &Registration) -> ApiResponse {
        auth::register_user(&self.db, &self.queue, registration)
    }

    pub async fn login_user(&self, email: &str, password: &str) -> ApiResponse {
        auth::login_user(&self.db, &self.remote, email, password).await
    }

    pub fn request_password_reset(&self, email: &str, new_password: &str) -> ApiResponse {
        auth::request_password_reset(&self.queue, email, new_password)
    }

    pub fn find_local_user(&self, email: &str) -> Result<Option<LocalUser>, String> {
        users::find_user(&self.db, email)
    }

    pub fn health(&self) -> Result<HealthReport, String> {
        diagnostics::get_system_health(&self.db, &self.queue)
    }

    /// Persist `url` as the endpoint override. Takes effect on the next
    /// [`Stockroom::open`].
    pub fn save_endpoint(&self, url: &str) -> Result<(), String> {
        EndpointConfig::new(url).persist(&self.db)
    }

    /// Start background work: the catch-up drain and optional repeat timer.
    pub fn start(&self) {
        self.queue.start();
    }

    pub fn shutdown(&self) {
        self.queue.stop();
        info!("Stockroom stopped");
    }
}
