//! Loading and notification indicator.
//!
//! The call layer and the retry queue report progress through the
//! [`Indicator`] trait: a delayed loading indicator (blocking overlay or
//! non-blocking spinner toast) and short-lived message toasts. Every method
//! is idempotent and safe to call without a matching earlier call.
//!
//! [`LoadingOverlay`] is a headless implementation whose state can be
//! observed through a `watch` channel by whatever renders it.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delay before a loading indicator becomes visible.
pub const DEFAULT_SHOW_DELAY: Duration = Duration::from_millis(300);

/// How long a message toast stays up.
pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_secs(4);

/// The blocking overlay is force-cleared after this long.
pub const AUTO_HIDE_AFTER: Duration = Duration::from_secs(15);

const PLACEHOLDER_MESSAGE: &str = "Please wait...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowOptions {
    pub delay: Duration,
    /// Full-page overlay when true, spinner toast otherwise.
    pub blocking: bool,
}

impl Default for ShowOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_SHOW_DELAY,
            blocking: true,
        }
    }
}

impl ShowOptions {
    pub fn non_blocking() -> Self {
        Self {
            blocking: false,
            ..Self::default()
        }
    }
}

pub trait Indicator: Send + Sync {
    fn show(&self, message: &str, options: ShowOptions);

    fn hide(&self);

    fn toast(&self, message: &str, duration: Duration);
}

/// Indicator that only logs. Used when nothing renders progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicator;

impl Indicator for NoopIndicator {
    fn show(&self, message: &str, _options: ShowOptions) {
        debug!(text = message, "loading indicator shown");
    }

    fn hide(&self) {}

    fn toast(&self, message: &str, _duration: Duration) {
        debug!(text = message, "toast");
    }
}

/// Shows a loading indicator and hides it again when dropped, so every exit
/// path of a call clears it.
pub struct LoadingGuard<'a> {
    indicator: Option<&'a dyn Indicator>,
}

impl<'a> LoadingGuard<'a> {
    pub fn show(indicator: &'a dyn Indicator, message: &str, options: ShowOptions) -> Self {
        indicator.show(message, options);
        Self {
            indicator: Some(indicator),
        }
    }

    /// A guard that touches nothing, for callers managing their own indicator.
    pub fn inactive() -> Self {
        Self { indicator: None }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if let Some(indicator) = self.indicator {
            indicator.hide();
        }
    }
}

// ---------------------------------------------------------------------------
// Headless overlay
// ---------------------------------------------------------------------------

/// What a renderer should currently display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayView {
    /// Full-page blocking overlay text.
    pub blocking: Option<String>,
    /// Non-blocking spinner toast text.
    pub spinner: Option<String>,
    /// Transient message toast text.
    pub toast: Option<String>,
}

impl OverlayView {
    pub fn is_loading(&self) -> bool {
        self.blocking.is_some() || self.spinner.is_some()
    }
}

#[derive(Default)]
struct OverlayTimers {
    show: Option<JoinHandle<()>>,
    auto_hide: Option<JoinHandle<()>>,
    toast: Option<JoinHandle<()>>,
}

struct OverlayInner {
    view: watch::Sender<OverlayView>,
    timers: Mutex<OverlayTimers>,
    auto_hide_after: Duration,
}

impl OverlayInner {
    fn with_timers(&self, f: impl FnOnce(&mut OverlayTimers)) {
        match self.timers.lock() {
            Ok(mut timers) => f(&mut timers),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn reveal(self: &Arc<Self>, message: String, blocking: bool) {
        self.view.send_modify(|view| {
            if blocking {
                view.blocking = Some(message);
            } else {
                view.spinner = Some(message);
            }
        });
        if !blocking {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(self);
        let task = handle.spawn(async move {
            tokio::time::sleep(inner.auto_hide_after).await;
            warn!("Loading overlay auto-hide triggered");
            inner.clear_loading();
        });
        self.with_timers(|timers| {
            if let Some(previous) = timers.auto_hide.replace(task) {
                previous.abort();
            }
        });
    }

    fn clear_loading(&self) {
        self.with_timers(|timers| {
            if let Some(task) = timers.show.take() {
                task.abort();
            }
            if let Some(task) = timers.auto_hide.take() {
                task.abort();
            }
        });
        self.view.send_modify(|view| {
            view.blocking = None;
            view.spinner = None;
        });
    }
}

/// Headless loading overlay with delayed appearance and an auto-hide
/// safety timer. Clones share state.
#[derive(Clone)]
pub struct LoadingOverlay {
    inner: Arc<OverlayInner>,
}

impl LoadingOverlay {
    pub fn new() -> Self {
        Self::with_auto_hide(AUTO_HIDE_AFTER)
    }

    pub fn with_auto_hide(auto_hide_after: Duration) -> Self {
        let (view, _) = watch::channel(OverlayView::default());
        Self {
            inner: Arc::new(OverlayInner {
                view,
                timers: Mutex::new(OverlayTimers::default()),
                auto_hide_after,
            }),
        }
    }

    pub fn view(&self) -> OverlayView {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayView> {
        self.inner.view.subscribe()
    }
}

impl Default for LoadingOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator for LoadingOverlay {
    fn show(&self, message: &str, options: ShowOptions) {
        let message = if message.trim().is_empty() {
            PLACEHOLDER_MESSAGE.to_string()
        } else {
            message.to_string()
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.reveal(message, options.blocking);
            return;
        };

        let inner = Arc::clone(&self.inner);
        let task = handle.spawn(async move {
            tokio::time::sleep(options.delay).await;
            inner.reveal(message, options.blocking);
        });
        self.inner.with_timers(|timers| {
            if let Some(previous) = timers.show.replace(task) {
                previous.abort();
            }
        });
    }

    fn hide(&self) {
        self.inner.clear_loading();
    }

    fn toast(&self, message: &str, duration: Duration) {
        let message = message.to_string();
        self.inner
            .view
            .send_modify(|view| view.toast = Some(message.clone()));

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let task = handle.spawn(async move {
            tokio::time::sleep(duration).await;
            inner.view.send_modify(|view| {
                if view.toast.as_deref() == Some(message.as_str()) {
                    view.toast = None;
                }
            });
        });
        self.inner.with_timers(|timers| {
            if let Some(previous) = timers.toast.replace(task) {
                previous.abort();
            }
        });
    }
}
