//! Mock host implementations for testing

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_api::PermissionKind;
use warden_util::AppId;

use crate::{HostError, HostResult, OverlaySurface, UsageEvent, UsageEventSource};

/// Scriptable usage-event source
#[derive(Clone, Default)]
pub struct MockUsageEvents {
    /// App reported as freshly foregrounded on every query
    current: Arc<Mutex<Option<AppId>>>,

    /// Explicit events, filtered by the query window
    events: Arc<Mutex<Vec<UsageEvent>>>,

    /// Simulated revocation of usage access
    denied: Arc<Mutex<bool>>,

    /// Artificial latency for timeout tests
    query_delay: Arc<Mutex<Option<Duration>>>,

    queries: Arc<Mutex<u64>>,
}

impl MockUsageEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `app` as the foreground app on every subsequent query
    pub fn set_foreground(&self, app: Option<&str>) {
        *self.current.lock().unwrap() = app.map(AppId::new);
    }

    pub fn push_event(&self, event: UsageEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn set_permission(&self, granted: bool) {
        *self.denied.lock().unwrap() = !granted;
    }

    pub fn set_query_delay(&self, delay: Option<Duration>) {
        *self.query_delay.lock().unwrap() = delay;
    }

    /// Number of queries served so far
    pub fn query_count(&self) -> u64 {
        *self.queries.lock().unwrap()
    }
}

#[async_trait]
impl UsageEventSource for MockUsageEvents {
    async fn query_events(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> HostResult<Vec<UsageEvent>> {
        *self.queries.lock().unwrap() += 1;

        let delay = *self.query_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.denied.lock().unwrap() {
            return Err(HostError::PermissionDenied(PermissionKind::UsageAccess));
        }

        let mut events: Vec<UsageEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect();

        if let Some(app) = self.current.lock().unwrap().clone() {
            events.push(UsageEvent::foreground(app, end));
        }

        Ok(events)
    }

    fn has_permission(&self) -> bool {
        !*self.denied.lock().unwrap()
    }
}

/// Observable state of a [`MockOverlaySurface`]
#[derive(Debug, Clone, Default)]
pub struct MockOverlayRecord {
    /// Overlays currently live on the "screen"
    pub live_instances: usize,
    /// Highest number of simultaneously live overlays ever observed
    pub max_live_instances: usize,
    pub message: Option<String>,
    pub shows: usize,
    pub updates: usize,
    pub hides: usize,
    /// Name of the thread that performed the last window operation
    pub last_thread: Option<String>,
}

/// Overlay surface that records what would have been drawn
#[derive(Clone)]
pub struct MockOverlaySurface {
    record: Arc<Mutex<MockOverlayRecord>>,

    /// Simulated draw-overlay permission
    pub permission: Arc<Mutex<bool>>,

    /// Configure show to fail
    pub fail_show: Arc<Mutex<bool>>,
}

impl MockOverlaySurface {
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(MockOverlayRecord::default())),
            permission: Arc::new(Mutex::new(true)),
            fail_show: Arc::new(Mutex::new(false)),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        *self.permission.lock().unwrap() = granted;
    }

    /// Snapshot of everything recorded so far
    pub fn record(&self) -> MockOverlayRecord {
        self.record.lock().unwrap().clone()
    }

    /// Simulate the user dismissing the overlay behind the engine's back
    pub fn dismiss(&self) {
        let mut record = self.record.lock().unwrap();
        record.live_instances = record.live_instances.saturating_sub(1);
        record.message = None;
    }

    fn touch(record: &mut MockOverlayRecord) {
        record.last_thread = std::thread::current().name().map(str::to_string);
    }
}

impl Default for MockOverlaySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlaySurface for MockOverlaySurface {
    fn has_permission(&self) -> bool {
        *self.permission.lock().unwrap()
    }

    fn show(&mut self, message: &str) -> HostResult<()> {
        if !self.has_permission() {
            return Err(HostError::PermissionDenied(PermissionKind::DrawOverlay));
        }
        if *self.fail_show.lock().unwrap() {
            return Err(HostError::Overlay("Mock show failure".into()));
        }

        let mut record = self.record.lock().unwrap();
        record.live_instances += 1;
        record.max_live_instances = record.max_live_instances.max(record.live_instances);
        record.message = Some(message.to_string());
        record.shows += 1;
        Self::touch(&mut record);
        Ok(())
    }

    fn update_message(&mut self, message: &str) -> HostResult<()> {
        let mut record = self.record.lock().unwrap();
        if record.live_instances == 0 {
            return Err(HostError::Overlay("No overlay to update".into()));
        }
        record.message = Some(message.to_string());
        record.updates += 1;
        Self::touch(&mut record);
        Ok(())
    }

    fn hide(&mut self) -> HostResult<()> {
        let mut record = self.record.lock().unwrap();
        if record.live_instances == 0 {
            return Err(HostError::Overlay("No overlay to hide".into()));
        }
        record.live_instances -= 1;
        record.message = None;
        record.hides += 1;
        Self::touch(&mut record);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.record.lock().unwrap().live_instances > 0
    }
}
