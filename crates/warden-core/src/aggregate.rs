//! Usage aggregation
//!
//! Turns the stream of foreground samples into per-app foreground time per
//! local calendar day. Time between two ticks is credited to the app that
//! was last seen in front; usage therefore resets when the local date
//! changes at midnight.

use chrono::{DateTime, Local, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use warden_api::{AppUsageMinutes, UsageReport};
use warden_store::{Store, StoreResult};
use warden_util::{whole_minutes, AppId, MonotonicInstant, DAY_KEY_FORMAT};

/// Days of local usage history kept in the store
pub const USAGE_RETENTION_DAYS: u64 = 30;

pub struct UsageAggregator {
    store: Arc<dyn Store>,
    /// Longest gap between ticks that is still credited; longer gaps
    /// (suspend, stalled loop) count as this much
    max_gap: Duration,
    foreground: Option<AppId>,
    last_tick: Option<MonotonicInstant>,
    last_day: Option<NaiveDate>,
}

impl UsageAggregator {
    pub fn new(store: Arc<dyn Store>, max_gap: Duration) -> Self {
        Self {
            store,
            max_gap,
            foreground: None,
            last_tick: None,
            last_day: None,
        }
    }

    /// App currently credited with foreground time
    pub fn foreground(&self) -> Option<&AppId> {
        self.foreground.as_ref()
    }

    /// Account for one tick.
    ///
    /// `sampled` is the sampler's reading: `Some` when an app came to the
    /// front within the sampling window, `None` when nothing changed.
    pub fn record(
        &mut self,
        sampled: Option<&AppId>,
        now_mono: MonotonicInstant,
        now: DateTime<Local>,
    ) -> StoreResult<()> {
        let day = now.date_naive();

        if let (Some(app), Some(last)) = (&self.foreground, self.last_tick) {
            let elapsed = now_mono.duration_since(last).min(self.max_gap);
            // A tick spanning midnight is credited to the new day
            self.store.add_usage(app, day, elapsed)?;
        }

        if self.last_day != Some(day) {
            if self.last_day.is_some() {
                info!(day = %day.format(DAY_KEY_FORMAT), "Local day changed; usage starts over");
            }
            self.prune_history(day)?;
            self.last_day = Some(day);
        }

        if let Some(app) = sampled {
            if self.foreground.as_ref() != Some(app) {
                debug!(app_id = %app, "Foreground app changed");
                self.foreground = Some(app.clone());
            }
        }
        self.last_tick = Some(now_mono);
        Ok(())
    }

    /// Forget what is in front, e.g. after usage access was lost
    pub fn reset(&mut self) {
        self.foreground = None;
        self.last_tick = None;
    }

    /// Usage for `day` as recorded so far
    pub fn report(&self, day: NaiveDate) -> StoreResult<UsageReport> {
        build_report(self.store.as_ref(), day)
    }

    fn prune_history(&self, today: NaiveDate) -> StoreResult<()> {
        if let Some(cutoff) = today.checked_sub_days(chrono::Days::new(USAGE_RETENTION_DAYS)) {
            self.store.prune_usage_before(cutoff)?;
        }
        Ok(())
    }
}

/// Build the usage report for `day` from the local store.
///
/// Per-app minutes are rounded down individually; the total is rounded down
/// from the summed time, so it can exceed the sum of the per-app minutes.
pub fn build_report(store: &dyn Store, day: NaiveDate) -> StoreResult<UsageReport> {
    let usage = store.usage_for_day(day)?;
    let total: Duration = usage.iter().map(|(_, d)| *d).sum();

    Ok(UsageReport {
        day: day.format(DAY_KEY_FORMAT).to_string(),
        apps: usage
            .into_iter()
            .map(|(app_id, duration)| AppUsageMinutes {
                app_id,
                minutes: whole_minutes(duration),
            })
            .collect(),
        total_minutes: whole_minutes(total),
    })
}
