//! Graceful shutdown and run deadlines.
//!
//! A [`ShutdownCoordinator`] is shared across collection tasks so Ctrl+C stops
//! every task at its next page boundary. A run may also carry a deadline; both
//! are resolved into a [`CancelReason`] by [`cancelled`].

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Why a run stopped before the listing was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Ctrl+C or an explicit shutdown request
    Shutdown,
    /// The run deadline passed
    Deadline,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Shutdown => write!(f, "shutdown requested"),
            CancelReason::Deadline => write!(f, "deadline exceeded"),
        }
    }
}

/// Non-blocking check of both cancellation sources.
pub fn check_cancelled(
    shutdown: Option<&ShutdownCoordinator>,
    deadline: Option<Instant>,
) -> Option<CancelReason> {
    if shutdown.is_some_and(|s| s.is_shutdown_requested()) {
        return Some(CancelReason::Shutdown);
    }
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Some(CancelReason::Deadline);
    }
    None
}

/// Resolve when either cancellation source fires. Pending forever if neither is set.
pub async fn cancelled(shutdown: Option<SharedShutdown>, deadline: Option<Instant>) -> CancelReason {
    let shutdown_fut = async {
        match &shutdown {
            Some(s) => s.wait_for_shutdown().await,
            None => std::future::pending::<()>().await,
        }
    };
    let deadline_fut = async {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = shutdown_fut => CancelReason::Shutdown,
        _ = deadline_fut => CancelReason::Deadline,
    }
}
