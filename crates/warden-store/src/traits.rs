//! Store trait definitions

use chrono::NaiveDate;
use std::time::Duration;
use warden_util::AppId;

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Usage accounting

    /// Get foreground time of an app on a specific day
    fn get_usage(&self, app_id: &AppId, day: NaiveDate) -> StoreResult<Duration>;

    /// Add foreground time for an app on a specific day
    fn add_usage(&self, app_id: &AppId, day: NaiveDate, duration: Duration) -> StoreResult<()>;

    /// Foreground time of every app used on a day, sorted by app ID
    fn usage_for_day(&self, day: NaiveDate) -> StoreResult<Vec<(AppId, Duration)>>;

    /// Drop usage rows of days before `day`; returns the number removed
    fn prune_usage_before(&self, day: NaiveDate) -> StoreResult<usize>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
