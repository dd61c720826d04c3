//! In-memory usage-event log
//!
//! Hosts whose OS does not keep a queryable usage history (e.g. a Wayland
//! compositor that only streams focus changes) record events here as they
//! arrive. The log keeps a bounded tail of recent events and answers window
//! queries exactly like an OS usage-stats service would.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use warden_api::PermissionKind;

use crate::{HostError, HostResult, UsageEvent, UsageEventSource};

/// Default number of events kept
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Default age after which events are dropped
pub const DEFAULT_LOG_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Bounded, shareable usage-event log
#[derive(Clone)]
pub struct UsageEventLog {
    events: Arc<Mutex<VecDeque<UsageEvent>>>,
    available: Arc<AtomicBool>,
    capacity: usize,
    retention: chrono::Duration,
}

impl UsageEventLog {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_LOG_CAPACITY, DEFAULT_LOG_RETENTION)
    }

    pub fn with_limits(capacity: usize, retention: Duration) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(4096)))),
            available: Arc::new(AtomicBool::new(true)),
            capacity: capacity.max(1),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Append an event as reported by the platform
    pub fn record(&self, event: UsageEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let newest = event.timestamp;
        events.push_back(event);

        let cutoff = newest - self.retention;
        while events.front().is_some_and(|e| e.timestamp < cutoff) {
            events.pop_front();
        }
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Mark the platform feed as (un)observable. While unavailable, queries
    /// fail with `PermissionDenied(UsageAccess)`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UsageEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageEventSource for UsageEventLog {
    async fn query_events(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> HostResult<Vec<UsageEvent>> {
        if !self.is_available() {
            return Err(HostError::PermissionDenied(PermissionKind::UsageAccess));
        }

        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(events
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect())
    }

    fn has_permission(&self) -> bool {
        self.is_available()
    }
}
