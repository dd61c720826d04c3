//! Remote sync
//!
//! Two independent tasks keep the engine in step with the remote store:
//! - [`PolicySync`] follows today's policy document and installs each new
//!   version in the [`PolicyCache`]
//! - [`UsagePush`] periodically merges locally aggregated usage into the
//!   same document
//!
//! Neither touches the sampling loop; the only shared state is the cache.

use chrono::{DateTime, Local, NaiveDate};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_api::{EventPayload, UsageReport};
use warden_config::SyncConfig;
use warden_remote::{
    document_key, parse_policy, PolicySource, RemoteDocument, RemoteError, RemoteResult,
    UsageSink,
};
use warden_store::{AuditEvent, AuditEventType, Store};
use warden_util::{day_key, Backoff, DeviceId};

use crate::{build_report, EventBus, PolicyCache, ReplaceOutcome};

/// Run a remote call with a deadline
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = RemoteResult<T>>,
) -> RemoteResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| RemoteError::Timeout)?
}

/// Sleep unless cancelled first; returns false on cancellation
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Time until the next local midnight
pub fn until_next_day(now: DateTime<Local>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest());

    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
        None => Duration::from_secs(3600),
    }
}

fn audit(store: &dyn Store, event: AuditEventType) {
    if let Err(e) = store.append_audit(AuditEvent::new(event)) {
        warn!(error = %e, "Failed to record audit event");
    }
}

/// What happened to one remote document version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyUpdate {
    Applied,
    Stale,
    Rejected(String),
}

/// Follows the device's policy document and refreshes the cache
pub struct PolicySync {
    source: Arc<dyn PolicySource>,
    cache: PolicyCache,
    events: EventBus,
    store: Arc<dyn Store>,
    device_id: DeviceId,
    config: SyncConfig,
}

impl PolicySync {
    pub fn new(
        source: Arc<dyn PolicySource>,
        cache: PolicyCache,
        events: EventBus,
        store: Arc<dyn Store>,
        device_id: DeviceId,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            cache,
            events,
            store,
            device_id,
            config,
        }
    }

    /// Key of the document for the local day of `now`
    pub fn key_for(&self, now: &DateTime<Local>) -> String {
        document_key(&self.device_id, &day_key(now))
    }

    /// Fetch today's document once, waiting at most `limit`.
    /// Returns whether a policy was installed.
    pub async fn initial_fetch(&self, limit: Duration) -> bool {
        let key = self.key_for(&warden_util::now());

        match bounded(limit, self.source.fetch(&key)).await {
            Ok(Some(doc)) => self.apply_document(&doc) == PolicyUpdate::Applied,
            Ok(None) => {
                info!(key = %key, "No policy document yet; observing only");
                false
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Initial policy fetch failed; observing only");
                false
            }
        }
    }

    /// Validate a document version and install it if it is not stale
    pub fn apply_document(&self, doc: &RemoteDocument) -> PolicyUpdate {
        let snapshot = match parse_policy(doc) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.reject(&e);
                return PolicyUpdate::Rejected(e.to_string());
            }
        };

        let source_time = snapshot.source_time;
        let blocked_count = snapshot.blocked_apps.len();
        let limit_count = snapshot.app_limits.len();

        match self.cache.replace_if_newer(snapshot) {
            ReplaceOutcome::Applied => {
                info!(
                    key = %doc.key,
                    blocked_count,
                    limit_count,
                    "Policy applied"
                );
                audit(
                    self.store.as_ref(),
                    AuditEventType::PolicyApplied {
                        source_time,
                        blocked_count,
                        limit_count,
                    },
                );
                self.events.publish(EventPayload::PolicyApplied {
                    source_time,
                    blocked_count,
                    limit_count,
                });
                PolicyUpdate::Applied
            }
            ReplaceOutcome::Stale { cached } => {
                debug!(key = %doc.key, incoming = ?source_time, cached = ?cached, "Stale policy ignored");
                self.events.publish(EventPayload::StalePolicyIgnored {
                    incoming: source_time,
                    cached,
                });
                PolicyUpdate::Stale
            }
        }
    }

    fn reject(&self, error: &RemoteError) {
        warn!(error = %error, "Discarding invalid policy document");
        let reason = error.to_string();
        audit(
            self.store.as_ref(),
            AuditEventType::PolicyRejected {
                reason: reason.clone(),
            },
        );
        self.events.publish(EventPayload::PolicyRejected { reason });
    }

    /// Carry the cached policy into a new day with usage zeroed, so
    /// yesterday's usage stops counting before today's document shows up
    fn roll_over(&self, today: &str) {
        if !self.cache.has_policy() {
            return;
        }
        let current = self.cache.get();
        if let Some(day) = &current.day {
            if day.as_str() < today {
                info!(from = %day, to = %today, "Carrying policy into new day");
                self.cache.replace(current.rolled_over(today));
            }
        }
    }

    /// Follow today's document until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);

        'subscribe: loop {
            let now = warden_util::now();
            self.roll_over(&day_key(&now));
            let key = self.key_for(&now);

            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break 'subscribe,
                r = bounded(self.config.remote_timeout, self.source.subscribe(&key)) => r,
            };
            let mut subscription = match subscribed {
                Ok(subscription) => {
                    info!(key = %key, "Subscribed to policy document");
                    subscription
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        key = %key,
                        error = %e,
                        attempt = backoff.attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Policy subscription failed"
                    );
                    if !sleep_or_cancel(&cancel, delay).await {
                        break 'subscribe;
                    }
                    continue 'subscribe;
                }
            };

            let day_change = tokio::time::sleep(until_next_day(now));
            tokio::pin!(day_change);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'subscribe,
                    _ = &mut day_change => {
                        info!("Local day changed; following new document");
                        continue 'subscribe;
                    }
                    item = subscription.next() => match item {
                        Some(Ok(doc)) => {
                            backoff.reset();
                            self.apply_document(&doc);
                        }
                        Some(Err(e)) if !e.is_retryable() => self.reject(&e),
                        Some(Err(e)) => {
                            warn!(key = %key, error = %e, "Policy subscription failed");
                            break;
                        }
                        None => {
                            warn!(key = %key, "Policy subscription ended");
                            break;
                        }
                    },
                }
            }

            let delay = backoff.next_delay();
            debug!(retry_in_ms = delay.as_millis() as u64, "Resubscribing");
            if !sleep_or_cancel(&cancel, delay).await {
                break;
            }
        }

        debug!("Policy sync stopped");
    }
}

/// Periodically merges local usage into the remote document
pub struct UsagePush {
    sink: Arc<dyn UsageSink>,
    store: Arc<dyn Store>,
    events: EventBus,
    device_id: DeviceId,
    config: SyncConfig,
    last_pushed: Option<UsageReport>,
}

impl UsagePush {
    pub fn new(
        sink: Arc<dyn UsageSink>,
        store: Arc<dyn Store>,
        events: EventBus,
        device_id: DeviceId,
        config: SyncConfig,
    ) -> Self {
        Self {
            sink,
            store,
            events,
            device_id,
            config,
            last_pushed: None,
        }
    }

    /// Push the report for `day` unless it is empty or already pushed.
    /// Returns whether a write happened.
    pub async fn push_day(&mut self, day: NaiveDate) -> RemoteResult<bool> {
        let report = build_report(self.store.as_ref(), day)
            .map_err(|e| RemoteError::Transient(format!("Local store: {e}")))?;

        if report.is_empty() || self.last_pushed.as_ref() == Some(&report) {
            return Ok(false);
        }

        let key = document_key(&self.device_id, &report.day);
        bounded(self.config.remote_timeout, self.sink.merge_usage(&key, &report)).await?;

        info!(
            key = %key,
            apps = report.apps.len(),
            total_minutes = report.total_minutes,
            "Usage pushed"
        );
        audit(
            self.store.as_ref(),
            AuditEventType::UsagePushed {
                day: report.day.clone(),
                total_minutes: report.total_minutes,
            },
        );
        self.events.publish(EventPayload::UsagePushed {
            day: report.day.clone(),
            app_count: report.apps.len(),
            total_minutes: report.total_minutes,
        });
        self.last_pushed = Some(report);
        Ok(true)
    }

    /// One push cycle: finish the previous day if it changed since its last
    /// push, then push today
    pub async fn push_once(&mut self) -> RemoteResult<bool> {
        let today = warden_util::now().date_naive();

        let previous = self
            .last_pushed
            .as_ref()
            .and_then(|r| warden_util::parse_day_key(&r.day))
            .filter(|day| *day < today);
        if let Some(previous) = previous {
            self.push_day(previous).await?;
        }

        self.push_day(today).await
    }

    /// Push on a fixed interval until cancelled. A push already in flight
    /// when cancellation arrives is allowed to finish.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.push_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);

        'tick: loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            loop {
                match self.push_once().await {
                    Ok(_) => {
                        backoff.reset();
                        break;
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(error = %e, attempt = backoff.attempts(), "Usage push failed");
                        self.events.publish(EventPayload::UsagePushFailed {
                            attempt: backoff.attempts(),
                            error: e.to_string(),
                        });

                        // The next tick retries anyway
                        if !e.is_retryable() || delay >= self.config.push_interval {
                            break;
                        }
                        if !sleep_or_cancel(&cancel, delay).await {
                            break 'tick;
                        }
                    }
                }
            }
        }

        debug!("Usage push stopped");
    }
}
