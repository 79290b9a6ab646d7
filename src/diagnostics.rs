//! Diagnostics for Stockroom.
//!
//! Provides:
//! - **About info**: version and platform
//! - **Health snapshot**: endpoint configuration, schema version, queue backlog
//! - **Log rotation helpers**: used by `lib.rs` before installing the
//!   rolling file appender.

use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::db::DbState;
use crate::queue::{ProcessorState, SyncQueue};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the daily rolling log.
pub const LOG_FILE_PREFIX: &str = "stockroom";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub endpoint_configured: bool,
    pub schema_version: i32,
    pub pending_sync: usize,
    pub sync_state: ProcessorState,
    pub sync_timer_active: bool,
}

pub fn get_system_health(db: &DbState, queue: &SyncQueue) -> Result<HealthReport, String> {
    let schema_version: i32 = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| format!("read schema version: {e}"))?
    };
    let status = queue.status()?;

    Ok(HealthReport {
        endpoint_configured: queue.remote().is_configured(),
        schema_version,
        pending_sync: status.pending,
        sync_state: status.state,
        sync_timer_active: status.timer_active,
    })
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

fn is_log_file(name: &str) -> bool {
    name.starts_with(&format!("{LOG_FILE_PREFIX}.")) || name == format!("{LOG_FILE_PREFIX}.log")
}

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`. Returns how many files were removed.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    if !log_dir.exists() {
        return 0;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_log_file(name) {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first; ties broken by name so dated files sort predictably.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, QueueConfig};
    use crate::db;
    use crate::remote::RemoteClient;
    use crate::testing::{MockTransport, RecordingIndicator};
    use std::sync::Arc;

    #[test]
    fn test_prune_keeps_newest_log_files() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=12 {
            let name = format!("{LOG_FILE_PREFIX}.2026-01-{day:02}");
            fs::write(dir.path().join(name), "line\n").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(prune_old_logs(dir.path()), 2);

        let remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining.len(), MAX_LOG_FILES + 1);
        assert!(remaining.contains(&"notes.txt".to_string()));
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_old_logs(&dir.path().join("absent")), 0);
    }

    #[test]
    fn test_health_reports_backlog() {
        let db = Arc::new(db::init_in_memory().unwrap());
        let remote = RemoteClient::new(
            EndpointConfig::unconfigured(),
            MockTransport::new(),
            RecordingIndicator::new(),
        );
        let queue = SyncQueue::new(db.clone(), remote, QueueConfig::default());
        queue
            .append(crate::queue::QueueAction::ResetPassword {
                email: "ann@x.com".into(),
                new_password: "pw".into(),
            })
            .unwrap();

        let health = get_system_health(&db, &queue).unwrap();
        assert!(!health.endpoint_configured);
        assert_eq!(health.schema_version, 1);
        assert_eq!(health.pending_sync, 1);
        assert_eq!(health.sync_state, ProcessorState::Idle);
        assert!(!health.sync_timer_active);
    }

    #[test]
    fn test_about_info_has_version() {
        assert_eq!(get_about_info()["version"], env!("CARGO_PKG_VERSION"));
    }
}
