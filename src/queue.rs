//! Durable retry queue.
//!
//! Mutations that must eventually reach the remote endpoint (password
//! resets, registration mirrors) are appended to a JSON list persisted under
//! the `syncQueue` key and replayed by [`SyncQueue::drain`]. A drain scans
//! the list in reverse index order, removes delivered items, and counts
//! failed attempts; an item whose attempts exceed [`MAX_ATTEMPTS`] is
//! dropped with a notification. Network errors, timeouts and non-2xx
//! replies all count as a failed attempt.
//!
//! At most one drain runs at a time; a drain requested while another is in
//! flight returns [`DrainOutcome::AlreadyRunning`] without doing anything.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Registration;
use crate::config::QueueConfig;
use crate::data_helpers::{read_local_vec, update_local_vec};
use crate::db::DbState;
use crate::indicator::DEFAULT_TOAST_DURATION;
use crate::remote::{Call, RemoteClient, ResponsePolicy};

pub(crate) const QUEUE_KEY: &str = "syncQueue";

/// Failed attempts tolerated before an item is dropped.
pub const MAX_ATTEMPTS: u32 = 3;

pub const ENQUEUED_TOAST: &str = "Changes will be saved in the background";
pub const SYNCED_TOAST: &str = "Sync succeeded";
pub const DROPPED_TOAST: &str = "Sync failed: dropped after several attempts";

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// A pending mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    ResetPassword { email: String, new_password: String },
    Register(Registration),
    /// An action this build does not know how to replay. Kept verbatim
    /// until the next drain drops it.
    Unknown { action: String, fields: Map<String, Value> },
}

impl QueueAction {
    pub fn name(&self) -> &str {
        match self {
            Self::ResetPassword { .. } => "resetPassword",
            Self::Register(_) => "register",
            Self::Unknown { action, .. } => action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawQueueItem", into = "RawQueueItem")]
pub struct QueueItem {
    pub action: QueueAction,
    pub attempts: u32,
    /// Creation time, unix milliseconds.
    pub ts: i64,
}

impl QueueItem {
    pub fn new(action: QueueAction) -> Self {
        Self {
            action,
            attempts: 0,
            ts: Utc::now().timestamp_millis(),
        }
    }
}

/// On-disk layout: `{"action": ..., <action fields>, "attempts": n, "ts": ms}`.
#[derive(Serialize, Deserialize)]
struct RawQueueItem {
    action: String,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    ts: i64,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

fn str_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

impl From<RawQueueItem> for QueueItem {
    fn from(raw: RawQueueItem) -> Self {
        let known = match raw.action.as_str() {
            "resetPassword" => str_field(&raw.fields, "email")
                .zip(str_field(&raw.fields, "newPassword"))
                .map(|(email, new_password)| QueueAction::ResetPassword {
                    email,
                    new_password,
                }),
            "register" => raw
                .fields
                .get("payload")
                .cloned()
                .and_then(|payload| serde_json::from_value(payload).ok())
                .map(QueueAction::Register),
            _ => None,
        };
        let action = known.unwrap_or(QueueAction::Unknown {
            action: raw.action,
            fields: raw.fields,
        });
        Self {
            action,
            attempts: raw.attempts,
            ts: raw.ts,
        }
    }
}

impl From<QueueItem> for RawQueueItem {
    fn from(item: QueueItem) -> Self {
        let name = item.action.name().to_string();
        let fields = match item.action {
            QueueAction::ResetPassword {
                email,
                new_password,
            } => {
                let mut fields = Map::new();
                fields.insert("email".into(), Value::String(email));
                fields.insert("newPassword".into(), Value::String(new_password));
                fields
            }
            QueueAction::Register(registration) => {
                let mut fields = Map::new();
                fields.insert(
                    "payload".into(),
                    serde_json::to_value(&registration).unwrap_or_default(),
                );
                fields
            }
            QueueAction::Unknown { fields, .. } => fields,
        };
        Self {
            action: name,
            attempts: item.attempts,
            ts: item.ts,
            fields,
        }
    }
}

// ---------------------------------------------------------------------------
// Processor state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Idle,
    Draining,
}

/// Counts from one completed drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Delivered and removed.
    pub synced: usize,
    /// Failed but kept for a later drain.
    pub retained: usize,
    /// Removed after exceeding [`MAX_ATTEMPTS`].
    pub dropped: usize,
    /// Removed because the action is unknown.
    pub discarded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    AlreadyRunning,
    NotConfigured,
    Completed(DrainReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub pending: usize,
    pub state: ProcessorState,
    pub timer_active: bool,
}

enum Dispatch {
    Delivered,
    Unknown,
    Failed(String),
}

struct TimerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct QueueInner {
    db: Arc<DbState>,
    remote: RemoteClient,
    config: QueueConfig,
    state: Mutex<ProcessorState>,
    timer: Mutex<Option<TimerHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the processor to idle when the drain ends, on every path.
struct DrainGuard<'a> {
    state: &'a Mutex<ProcessorState>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = ProcessorState::Idle;
    }
}

// ---------------------------------------------------------------------------
// Queue processor
// ---------------------------------------------------------------------------

/// Owns the persisted retry queue, its drain state and its timer.
/// Clones share all three.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

impl SyncQueue {
    pub fn new(db: Arc<DbState>, remote: RemoteClient, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                db,
                remote,
                config,
                state: Mutex::new(ProcessorState::Idle),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn remote(&self) -> &RemoteClient {
        &self.inner.remote
    }

    /// The persisted queue, oldest first.
    pub fn pending(&self) -> Result<Vec<QueueItem>, String> {
        read_local_vec(&self.inner.db, QUEUE_KEY)
    }

    pub fn len(&self) -> Result<usize, String> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, String> {
        Ok(self.len()? == 0)
    }

    pub fn status(&self) -> Result<QueueStatus, String> {
        let timer_active = lock(&self.inner.timer)
            .as_ref()
            .is_some_and(|timer| !timer.task.is_finished());
        Ok(QueueStatus {
            pending: self.len()?,
            state: *lock(&self.inner.state),
            timer_active,
        })
    }

    /// Append without triggering a drain.
    pub(crate) fn append(&self, action: QueueAction) -> Result<QueueItem, String> {
        let item = QueueItem::new(action);
        let pending = update_local_vec(&self.inner.db, QUEUE_KEY, |queue: &mut Vec<QueueItem>| {
            queue.push(item.clone());
            queue.len()
        })?;
        info!(
            action = item.action.name(),
            pending,
            "Queued for background sync"
        );
        Ok(item)
    }

    /// Persist `action` with zero attempts, kick off a background drain and
    /// tell the user the change will be saved later.
    pub fn enqueue(&self, action: QueueAction) -> Result<(), String> {
        self.append(action)?;
        self.spawn_drain();
        self.inner
            .remote
            .indicator()
            .toast(ENQUEUED_TOAST, DEFAULT_TOAST_DURATION);
        Ok(())
    }

    fn spawn_drain(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, background drain deferred");
            return;
        };
        let queue = self.clone();
        handle.spawn(async move { queue.drain_logged().await });
    }

    async fn drain_logged(&self) {
        match self.drain().await {
            Ok(DrainOutcome::Completed(report)) if report != DrainReport::default() => {
                info!(
                    synced = report.synced,
                    retained = report.retained,
                    dropped = report.dropped,
                    discarded = report.discarded,
                    "Sync queue drained"
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Sync queue drain failed: {e}"),
        }
    }

    fn try_begin(&self) -> Option<DrainGuard<'_>> {
        let mut state = lock(&self.inner.state);
        if *state == ProcessorState::Draining {
            return None;
        }
        *state = ProcessorState::Draining;
        Some(DrainGuard {
            state: &self.inner.state,
        })
    }

    /// Attempt every queued item once.
    pub async fn drain(&self) -> Result<DrainOutcome, String> {
        let Some(_guard) = self.try_begin() else {
            debug!("Drain already in progress, skipping");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        if !self.inner.remote.is_configured() {
            debug!("Remote endpoint not configured, keeping queue pending");
            return Ok(DrainOutcome::NotConfigured);
        }

        let mut queue = self.pending()?;
        let mut report = DrainReport::default();
        if queue.is_empty() {
            return Ok(DrainOutcome::Completed(report));
        }
        let scanned = queue.len();
        let indicator = self.inner.remote.indicator();

        // Reverse order so removing index i never shifts an unvisited item.
        for index in (0..scanned).rev() {
            let outcome = self.dispatch(&queue[index].action).await;
            match outcome {
                Dispatch::Delivered => {
                    let item = queue.remove(index);
                    info!(action = item.action.name(), "Queued item synced");
                    indicator.toast(SYNCED_TOAST, DEFAULT_TOAST_DURATION);
                    report.synced += 1;
                }
                Dispatch::Unknown => {
                    let item = queue.remove(index);
                    warn!(action = item.action.name(), "Unknown sync action, dropping");
                    report.discarded += 1;
                }
                Dispatch::Failed(error) => {
                    let item = &mut queue[index];
                    item.attempts += 1;
                    if item.attempts > MAX_ATTEMPTS {
                        warn!(
                            action = item.action.name(),
                            attempts = item.attempts,
                            error = %error,
                            "Dropping sync item after too many attempts"
                        );
                        queue.remove(index);
                        indicator.toast(DROPPED_TOAST, DEFAULT_TOAST_DURATION);
                        report.dropped += 1;
                    } else {
                        debug!(
                            action = item.action.name(),
                            attempts = item.attempts,
                            error = %error,
                            "Sync attempt failed, will retry"
                        );
                        report.retained += 1;
                    }
                }
            }
        }

        // Keep anything enqueued while this drain was waiting on the network.
        // Only appends happen during a drain, so those are the items past
        // the scanned prefix.
        update_local_vec(&self.inner.db, QUEUE_KEY, |stored: &mut Vec<QueueItem>| {
            let appended = stored.split_off(scanned.min(stored.len()));
            *stored = queue;
            stored.extend(appended);
        })?;

        Ok(DrainOutcome::Completed(report))
    }

    async fn dispatch(&self, action: &QueueAction) -> Dispatch {
        let timeout = self.inner.config.request_timeout;
        let call = match action {
            QueueAction::ResetPassword {
                email,
                new_password,
            } => Call::get("resetPassword", ResponsePolicy::Strict)
                .param("email", email.as_str())
                .param("newPassword", new_password.as_str())
                .timeout(timeout),
            QueueAction::Register(registration) => {
                Call::post("register", ResponsePolicy::Assumed("Registered"))
                    .param("name", registration.name.as_str())
                    .param("email", registration.email.as_str())
                    .param("password", registration.password.as_str())
                    .param(
                        "securityQuestion",
                        registration.security_question.clone().unwrap_or_default(),
                    )
                    .param(
                        "securityAnswer",
                        registration.security_answer.clone().unwrap_or_default(),
                    )
                    .param("hint", registration.hint.clone().unwrap_or_default())
                    .timeout(timeout)
            }
            QueueAction::Unknown { .. } => return Dispatch::Unknown,
        };
        match self.inner.remote.deliver(&call).await {
            Ok(()) => Dispatch::Delivered,
            Err(e) => Dispatch::Failed(e.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// Arm the timer: one catch-up drain after `initial_delay` for items left
    /// by a previous session, then one per `interval` if configured.
    /// Does nothing if the timer is already running.
    pub fn start(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Sync queue timer needs an async runtime, not started");
            return;
        };
        let mut timer = lock(&self.inner.timer);
        if timer.as_ref().is_some_and(|t| !t.task.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let queue = self.clone();
        let config = self.inner.config;
        let task = handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(config.initial_delay) => {}
            }
            queue.drain_logged().await;

            let Some(interval) = config.interval else {
                return;
            };
            info!("Sync queue timer started (interval: {}s)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => queue.drain_logged().await,
                }
            }
            info!("Sync queue timer stopped");
        });
        *timer = Some(TimerHandle { cancel, task });
    }

    /// Cancel the timer. A drain already in flight finishes normally.
    pub fn stop(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.cancel.cancel();
        }
    }
}
