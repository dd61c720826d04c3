//! Host adapter traits

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use warden_api::PermissionKind;
use warden_util::{AppId, WardenError};

/// Errors from host operations
#[derive(Debug, Error)]
pub enum HostError {
    /// The user has not granted (or has revoked) a required permission
    #[error("Permission denied: {0:?}")]
    PermissionDenied(PermissionKind),

    /// The OS query did not complete in time
    #[error("Host query timed out")]
    Timeout,

    /// The platform facility is not reachable right now
    #[error("Host unavailable: {0}")]
    Unavailable(String),

    #[error("Overlay operation failed: {0}")]
    Overlay(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HostError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, HostError::PermissionDenied(_))
    }
}

impl From<HostError> for WardenError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::PermissionDenied(kind) => WardenError::permission(format!("{kind:?}")),
            other => WardenError::host(other.to_string()),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// Kind of entry in the OS usage-event log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageEventKind {
    /// An app's activity came to the foreground
    MovedToForeground,
    /// An app's activity left the foreground
    MovedToBackground,
    /// Anything else the OS reports (screen on/off, config changes, ...)
    Other,
}

/// One entry of the OS usage-event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    pub app_id: AppId,
    pub kind: UsageEventKind,
    pub timestamp: DateTime<Local>,
}

impl UsageEvent {
    pub fn foreground(app_id: impl Into<AppId>, timestamp: DateTime<Local>) -> Self {
        Self {
            app_id: app_id.into(),
            kind: UsageEventKind::MovedToForeground,
            timestamp,
        }
    }

    pub fn background(app_id: impl Into<AppId>, timestamp: DateTime<Local>) -> Self {
        Self {
            app_id: app_id.into(),
            kind: UsageEventKind::MovedToBackground,
            timestamp,
        }
    }
}

/// Read access to the OS usage-event log
#[async_trait]
pub trait UsageEventSource: Send + Sync {
    /// Events with `start <= timestamp <= end`, in the order the OS reports
    /// them. Fails with `PermissionDenied(UsageAccess)` when the log cannot be
    /// read.
    async fn query_events(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> HostResult<Vec<UsageEvent>>;

    /// Whether usage access is currently granted
    fn has_permission(&self) -> bool {
        true
    }
}

/// A system-level blocking surface.
///
/// Implementations are driven exclusively from the UI-owning thread, so they
/// may hold platform handles that must not be touched elsewhere. The overlay
/// controller guarantees `show` is only called while nothing is shown and
/// `update_message`/`hide` only while something is.
pub trait OverlaySurface: Send {
    /// Whether the app may currently draw overlays. Checked on every block
    /// attempt; never cached by callers.
    fn has_permission(&self) -> bool;

    /// Create the overlay with the given message
    fn show(&mut self, message: &str) -> HostResult<()>;

    /// Change the message of the live overlay without recreating it
    fn update_message(&mut self, message: &str) -> HostResult<()>;

    /// Remove the live overlay
    fn hide(&mut self) -> HostResult<()>;

    /// Whether the overlay last shown is still on screen. Surfaces the user
    /// can dismiss report false once that happened.
    fn is_alive(&mut self) -> bool {
        true
    }

    /// How the UI thread should run its command loop. Toolkit-backed
    /// surfaces return a driver that spins the toolkit's main loop.
    fn ui_driver(&self) -> Box<dyn UiDriver> {
        Box::new(RuntimeUiDriver)
    }
}

/// The UI thread's command loop, run to completion on that thread
pub type UiTask = Pin<Box<dyn Future<Output = ()>>>;

/// Runs the UI thread's command loop on the thread that calls it
pub trait UiDriver: Send {
    fn run(self: Box<Self>, task: UiTask) -> HostResult<()>;
}

/// Drives the command loop on a current-thread tokio runtime
pub struct RuntimeUiDriver;

impl UiDriver for RuntimeUiDriver {
    fn run(self: Box<Self>, task: UiTask) -> HostResult<()> {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        runtime.block_on(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn runtime_driver_runs_task_to_completion() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let task: UiTask = Box::pin(async move {
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        });

        Box::new(RuntimeUiDriver).run(task).unwrap();
        assert!(done.load(Ordering::SeqCst));
    }
}
