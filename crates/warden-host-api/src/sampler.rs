//! Foreground app sampler

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use warden_api::ForegroundSample;
use warden_util::AppId;

use crate::{HostError, HostResult, UsageEvent, UsageEventKind, UsageEventSource};

/// Determines the foreground app from the OS usage-event log
#[derive(Clone)]
pub struct ForegroundSampler {
    source: Arc<dyn UsageEventSource>,
    query_timeout: Duration,
}

impl ForegroundSampler {
    pub fn new(source: Arc<dyn UsageEventSource>, query_timeout: Duration) -> Self {
        Self {
            source,
            query_timeout,
        }
    }

    /// The app that most recently moved to the foreground within the
    /// trailing `window`, or `None` if no such event happened. The sample is
    /// stamped with the time it was taken.
    ///
    /// Missing usage access surfaces as `HostError::PermissionDenied` so the
    /// caller can tell "nothing in front" from "cannot observe".
    pub async fn sample(&self, window: Duration) -> HostResult<Option<ForegroundSample>> {
        self.sample_at(warden_util::now(), window).await
    }

    /// Same as [`sample`](Self::sample) with an explicit "now"
    pub async fn sample_at(
        &self,
        now: DateTime<Local>,
        window: Duration,
    ) -> HostResult<Option<ForegroundSample>> {
        let window = chrono::Duration::from_std(window)
            .map_err(|_| HostError::Internal("sample window out of range".into()))?;
        let start = now - window;

        let events = tokio::time::timeout(self.query_timeout, self.source.query_events(start, now))
            .await
            .map_err(|_| HostError::Timeout)??;

        let current = latest_foreground(&events);
        trace!(events = events.len(), current = ?current, "Sampled foreground app");
        Ok(current.map(|app_id| ForegroundSample {
            app_id,
            observed_at: now,
        }))
    }
}

/// Pick the app of the latest foreground event.
///
/// The latest timestamp wins. Events with equal timestamps keep the order
/// the OS reported them in, so the later-reported one wins.
pub fn latest_foreground(events: &[UsageEvent]) -> Option<AppId> {
    let mut latest: Option<&UsageEvent> = None;

    for event in events
        .iter()
        .filter(|e| e.kind == UsageEventKind::MovedToForeground)
    {
        match latest {
            Some(current) if event.timestamp < current.timestamp => {}
            _ => latest = Some(event),
        }
    }

    latest.map(|e| e.app_id.clone())
}
