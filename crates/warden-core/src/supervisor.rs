//! Supervisor
//!
//! Owns the lifecycle of the engine:
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//!
//! While running there are three tasks: the sampling loop (under a
//! watchdog that restarts it if it panics), policy sync and usage push.
//! Stopping cancels all three, waits for them, and removes the overlay.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_api::{
    EnforcementDecision, EnforcementMode, EventPayload, LifecycleState, PermissionKind,
};
use warden_config::{EngineConfig, SamplingConfig};
use warden_host_api::{ForegroundSampler, OverlaySurface, UsageEventSource};
use warden_remote::{PolicySource, UsageSink};
use warden_store::{AuditEvent, AuditEventType, Store};
use warden_util::{AppId, MonotonicInstant, WardenError};

use crate::{
    DecisionEngine, EventBus, OverlayHandle, OverlayReporter, PolicyCache, PolicySync,
    UsageAggregator, UsagePush,
};

/// External collaborators of the engine
pub struct EngineDeps {
    pub usage_source: Arc<dyn UsageEventSource>,
    pub overlay_surface: Box<dyn OverlaySurface>,
    pub policy_source: Arc<dyn PolicySource>,
    pub usage_sink: Arc<dyn UsageSink>,
    pub store: Arc<dyn Store>,
}

struct RunningTasks {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

pub struct Supervisor {
    config: EngineConfig,
    cache: PolicyCache,
    events: EventBus,
    store: Arc<dyn Store>,
    usage_source: Arc<dyn UsageEventSource>,
    policy_source: Arc<dyn PolicySource>,
    usage_sink: Arc<dyn UsageSink>,
    overlay: OverlayHandle,
    state: watch::Sender<LifecycleState>,
    /// Held for the whole of start and stop, so they never interleave
    running: Mutex<Option<RunningTasks>>,
}

impl Supervisor {
    /// Build the engine and start its UI thread. The engine stays stopped
    /// until [`start`](Self::start).
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Result<Self, WardenError> {
        let events = EventBus::new();
        let (overlay, _ui_thread) = OverlayHandle::spawn(
            deps.overlay_surface,
            OverlayReporter {
                events: events.clone(),
                store: deps.store.clone(),
            },
        )?;
        let (state, _) = watch::channel(LifecycleState::Stopped);

        info!(device_id = %config.device_id, "Supervisor created");

        Ok(Self {
            config,
            cache: PolicyCache::new(),
            events,
            store: deps.store,
            usage_source: deps.usage_source,
            policy_source: deps.policy_source,
            usage_sink: deps.usage_sink,
            overlay,
            state,
            running: Mutex::new(None),
        })
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    pub fn overlay(&self) -> &OverlayHandle {
        &self.overlay
    }

    pub fn mode(&self) -> EnforcementMode {
        if self.cache.has_policy() {
            EnforcementMode::Enforcing
        } else {
            EnforcementMode::ObserveOnly
        }
    }

    fn set_state(&self, state: LifecycleState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            info!(state = ?state, "Lifecycle changed");
            self.events.publish(EventPayload::LifecycleChanged { state });
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to record audit event");
        }
    }

    /// Start the engine. Does nothing if it is already starting or running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if self.state().is_active() {
            debug!("Start requested while already running");
            return;
        }

        self.set_state(LifecycleState::Starting);
        self.audit(AuditEventType::ServiceStarted);

        // A policy from an earlier run must not be enforced before this
        // run has heard from the remote store
        self.cache.clear();

        let cancel = CancellationToken::new();
        let policy_sync = PolicySync::new(
            self.policy_source.clone(),
            self.cache.clone(),
            self.events.clone(),
            self.store.clone(),
            self.config.device_id.clone(),
            self.config.sync.clone(),
        );

        if policy_sync
            .initial_fetch(self.config.sampling.startup_fetch_timeout)
            .await
        {
            info!("Initial policy installed; enforcing");
        } else if !self.cache.has_policy() {
            info!("Starting without a policy; observing only");
        }

        let usage_push = UsagePush::new(
            self.usage_sink.clone(),
            self.store.clone(),
            self.events.clone(),
            self.config.device_id.clone(),
            self.config.sync.clone(),
        );

        let tasks = vec![
            ("policy-sync", tokio::spawn(policy_sync.run(cancel.clone()))),
            ("usage-push", tokio::spawn(usage_push.run(cancel.clone()))),
            ("sampling", self.spawn_sampling(cancel.clone())),
        ];

        *running = Some(RunningTasks { cancel, tasks });
        self.set_state(LifecycleState::Running);
    }

    /// Entry point for the host's boot-completed signal
    pub async fn on_boot_completed(&self) {
        info!("Boot completed");
        self.start().await;
    }

    /// Stop the engine and remove the overlay
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(tasks) = running.take() else {
            debug!("Stop requested while not running");
            return;
        };

        self.set_state(LifecycleState::Stopping);
        tasks.cancel.cancel();
        for (name, task) in tasks.tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Task ended abnormally");
            }
        }

        if self.overlay.hide().await.is_none() {
            warn!("UI thread is gone; overlay state unknown");
        }

        self.audit(AuditEventType::ServiceStopped);
        self.set_state(LifecycleState::Stopped);
    }

    fn spawn_sampling(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let ctx = SamplingContext {
            sampler: ForegroundSampler::new(
                self.usage_source.clone(),
                self.config.sampling.os_query_timeout,
            ),
            decision: DecisionEngine::new(self.config.messages.clone()),
            cache: self.cache.clone(),
            overlay: self.overlay.clone(),
            events: self.events.clone(),
            store: self.store.clone(),
            config: self.config.sampling.clone(),
        };

        tokio::spawn(async move {
            loop {
                let sampling = tokio::spawn(SamplingLoop::new(ctx.clone()).run(cancel.clone()));
                match sampling.await {
                    Ok(()) => break,
                    Err(e) if e.is_panic() => {
                        error!(
                            restart_in_ms = ctx.config.restart_delay.as_millis() as u64,
                            "Sampling loop panicked; restarting"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(ctx.config.restart_delay) => {}
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Sampling loop cancelled");
                        break;
                    }
                }
            }
        })
    }
}

/// Everything one sampling loop needs; cloned for each restart
#[derive(Clone)]
struct SamplingContext {
    sampler: ForegroundSampler,
    decision: DecisionEngine,
    cache: PolicyCache,
    overlay: OverlayHandle,
    events: EventBus,
    store: Arc<dyn Store>,
    config: SamplingConfig,
}

struct SamplingLoop {
    ctx: SamplingContext,
    aggregator: UsageAggregator,
    mode: EnforcementMode,
    usage_access: bool,
    /// Whether the last decision sent to the UI thread leaves an overlay up.
    /// The published overlay state lags behind queued commands.
    dispatched_visible: bool,
}

impl SamplingLoop {
    fn new(ctx: SamplingContext) -> Self {
        // Credit at most two ticks per gap
        let max_gap = ctx.config.interval.saturating_mul(2);
        let aggregator = UsageAggregator::new(ctx.store.clone(), max_gap);
        Self {
            ctx,
            aggregator,
            mode: EnforcementMode::ObserveOnly,
            usage_access: true,
            dispatched_visible: false,
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.ctx.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(interval_ms = self.ctx.config.interval.as_millis() as u64, "Sampling loop started");

        loop {
            // Cancellation is only observed between ticks
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        debug!("Sampling loop stopped");
    }

    async fn tick(&mut self) {
        let now = warden_util::now();
        let now_mono = MonotonicInstant::now();

        let current = match self.ctx.sampler.sample_at(now, self.ctx.config.window).await {
            Ok(current) => {
                if !self.usage_access {
                    info!("Usage access restored");
                    self.usage_access = true;
                }
                current.map(|sample| sample.app_id)
            }
            Err(e) if e.is_permission_denied() => {
                self.on_usage_access_lost();
                return;
            }
            Err(e) => {
                warn!(error = %e, "Foreground sampling failed");
                return;
            }
        };

        if let Err(e) = self.aggregator.record(current.as_ref(), now_mono, now) {
            warn!(error = %e, "Failed to record usage");
        }

        let mode = if self.ctx.cache.has_policy() {
            EnforcementMode::Enforcing
        } else {
            EnforcementMode::ObserveOnly
        };
        if mode != self.mode {
            info!(mode = ?mode, "Enforcement mode changed");
            self.mode = mode;
            self.ctx.events.publish(EventPayload::ModeChanged { mode });
        }
        if mode == EnforcementMode::ObserveOnly {
            return;
        }

        let snapshot = self.ctx.cache.get();
        let visible = self.dispatched_visible || self.ctx.overlay.is_visible();
        let decision = self
            .ctx
            .decision
            .decide(current.as_ref(), &snapshot, visible);
        self.dispatch(decision, current);
    }

    fn dispatch(&mut self, decision: EnforcementDecision, app_id: Option<AppId>) {
        match decision {
            EnforcementDecision::Block { .. } => self.dispatched_visible = true,
            EnforcementDecision::Unblock => self.dispatched_visible = false,
            EnforcementDecision::NoAction => {}
        }
        if !self.ctx.overlay.dispatch(decision, app_id) {
            warn!("UI thread is gone; cannot enforce");
        }
    }

    /// Without usage access nothing can be observed, so nothing is enforced
    fn on_usage_access_lost(&mut self) {
        self.aggregator.reset();

        if self.usage_access {
            warn!("Usage access permission missing");
            self.usage_access = false;
            if let Err(e) = self.ctx.store.append_audit(AuditEvent::new(
                AuditEventType::PermissionMissing {
                    permission: PermissionKind::UsageAccess,
                },
            )) {
                warn!(error = %e, "Failed to record audit event");
            }
            self.ctx.events.publish(EventPayload::PermissionRequired {
                permission: PermissionKind::UsageAccess,
            });
        }

        if self.dispatched_visible || self.ctx.overlay.is_visible() {
            self.dispatch(EnforcementDecision::Unblock, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_api::PolicySnapshot;
    use warden_host_api::{MockOverlaySurface, MockUsageEvents};
    use warden_remote::{document_key, MemoryDocumentStore};
    use warden_store::SqliteStore;
    use warden_util::{day_key, DeviceId};

    struct Harness {
        supervisor: Arc<Supervisor>,
        usage: MockUsageEvents,
        surface: MockOverlaySurface,
        remote: MemoryDocumentStore,
        key: String,
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::for_device("kid-tablet");
        config.sampling.interval = Duration::from_millis(20);
        config.sampling.window = Duration::from_millis(30);
        config.sampling.os_query_timeout = Duration::from_millis(200);
        config.sampling.startup_fetch_timeout = Duration::from_millis(200);
        config.sampling.restart_delay = Duration::from_millis(10);
        config.sync.push_interval = Duration::from_millis(100);
        config.sync.remote_timeout = Duration::from_millis(500);
        config.sync.backoff_initial = Duration::from_millis(5);
        config.sync.backoff_max = Duration::from_millis(20);
        config
    }

    fn harness() -> Harness {
        let usage = MockUsageEvents::new();
        let surface = MockOverlaySurface::new();
        let remote = MemoryDocumentStore::new();
        let deps = EngineDeps {
            usage_source: Arc::new(usage.clone()),
            overlay_surface: Box::new(surface.clone()),
            policy_source: Arc::new(remote.clone()),
            usage_sink: Arc::new(remote.clone()),
            store: Arc::new(SqliteStore::in_memory().unwrap()),
        };
        let supervisor = Arc::new(Supervisor::new(config(), deps).unwrap());
        let key = document_key(&DeviceId::new("kid-tablet"), &day_key(&warden_util::now()));
        Harness {
            supervisor,
            usage,
            surface,
            remote,
            key,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let h = harness();
        h.usage.set_foreground(Some("com.allowed"));

        h.supervisor.start().await;
        h.supervisor.start().await;
        h.supervisor.on_boot_completed().await;
        assert_eq!(h.supervisor.state(), LifecycleState::Running);

        // One loop queries once per tick; three loops would triple the rate
        tokio::time::sleep(Duration::from_millis(200)).await;
        let queries = h.usage.query_count();
        assert!(queries <= 200 / 20 + 3, "too many queries: {queries}");

        h.supervisor.stop().await;
        assert_eq!(h.supervisor.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn observe_only_until_policy_arrives() {
        let h = harness();
        h.usage.set_foreground(Some("com.game.x"));

        h.supervisor.start().await;
        assert_eq!(h.supervisor.mode(), EnforcementMode::ObserveOnly);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.surface.record().shows, 0);

        h.remote.put(&h.key, json!({"blockedApps": ["com.game.x"]}));
        let surface = h.surface.clone();
        wait_until(|| surface.record().live_instances == 1).await;
        assert_eq!(h.supervisor.mode(), EnforcementMode::Enforcing);

        h.supervisor.stop().await;
    }

    #[tokio::test]
    async fn stop_hides_overlay() {
        let h = harness();
        h.remote.put(&h.key, json!({"blockedApps": ["com.game.x"]}));
        h.usage.set_foreground(Some("com.game.x"));

        h.supervisor.start().await;
        let surface = h.surface.clone();
        wait_until(|| surface.record().live_instances == 1).await;

        h.supervisor.stop().await;
        assert_eq!(h.surface.record().live_instances, 0);
        assert!(!h.supervisor.overlay().is_visible());

        let stopped_queries = h.usage.query_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.usage.query_count(), stopped_queries);
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let h = harness();
        h.supervisor.stop().await;
        assert_eq!(h.supervisor.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let h = harness();
        h.supervisor.start().await;
        h.supervisor.stop().await;
        h.supervisor.start().await;
        assert_eq!(h.supervisor.state(), LifecycleState::Running);
        h.supervisor.stop().await;
    }

    #[tokio::test]
    async fn lost_usage_access_fails_open() {
        let h = harness();
        h.remote.put(&h.key, json!({"blockedApps": ["com.game.x"]}));
        h.usage.set_foreground(Some("com.game.x"));
        let mut events = h.supervisor.events().subscribe();

        h.supervisor.start().await;
        let surface = h.surface.clone();
        wait_until(|| surface.record().live_instances == 1).await;

        h.usage.set_permission(false);
        wait_until(|| surface.record().live_instances == 0).await;

        let mut saw_permission = false;
        while let Ok(event) = events.try_recv() {
            if event.payload
                == (EventPayload::PermissionRequired {
                    permission: PermissionKind::UsageAccess,
                })
            {
                saw_permission = true;
            }
        }
        assert!(saw_permission);

        h.supervisor.stop().await;
    }

    #[tokio::test]
    async fn restart_with_failed_fetch_observes_only() {
        let h = harness();
        h.remote.put(&h.key, json!({"blockedApps": ["com.game.x"]}));
        h.usage.set_foreground(Some("com.game.x"));

        h.supervisor.start().await;
        let surface = h.surface.clone();
        wait_until(|| surface.record().live_instances == 1).await;
        h.supervisor.stop().await;
        assert_eq!(h.surface.record().live_instances, 0);

        h.remote.set_fail_fetch(true);
        h.remote.fail_next_subscribes(1000);
        h.supervisor.start().await;
        assert_eq!(h.supervisor.mode(), EnforcementMode::ObserveOnly);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.supervisor.mode(), EnforcementMode::ObserveOnly);
        assert_eq!(h.surface.record().shows, 1);

        h.supervisor.stop().await;
    }

    #[tokio::test]
    async fn unblock_follows_queued_block_without_waiting_for_ui() {
        let usage = MockUsageEvents::new();
        let cache = PolicyCache::new();
        cache.replace(PolicySnapshot {
            blocked_apps: [AppId::new("com.game.x")].into_iter().collect(),
            ..Default::default()
        });
        let (overlay, mut commands) = OverlayHandle::detached();
        let config = config();
        let ctx = SamplingContext {
            sampler: ForegroundSampler::new(
                Arc::new(usage.clone()),
                config.sampling.os_query_timeout,
            ),
            decision: DecisionEngine::new(config.messages.clone()),
            cache,
            overlay,
            events: EventBus::new(),
            store: Arc::new(SqliteStore::in_memory().unwrap()),
            config: config.sampling.clone(),
        };
        let mut sampling = SamplingLoop::new(ctx);

        usage.set_foreground(Some("com.game.x"));
        sampling.tick().await;
        usage.set_foreground(Some("com.school.reader"));
        sampling.tick().await;

        let mut sent = Vec::new();
        while let Ok(command) = commands.try_recv() {
            if let crate::overlay::OverlayCommand::Apply { decision, .. } = command {
                sent.push(decision);
            }
        }
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], EnforcementDecision::Block { .. }));
        assert_eq!(sent[1], EnforcementDecision::Unblock);
        assert!(!sampling.dispatched_visible);
    }

    #[tokio::test]
    async fn lifecycle_events_in_order() {
        let h = harness();
        let mut events = h.supervisor.events().subscribe();

        h.supervisor.start().await;
        h.supervisor.stop().await;

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EventPayload::LifecycleChanged { state } = event.payload {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                LifecycleState::Starting,
                LifecycleState::Running,
                LifecycleState::Stopping,
                LifecycleState::Stopped,
            ]
        );
    }
}
