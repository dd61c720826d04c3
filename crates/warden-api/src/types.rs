//! Shared types for the warden engine

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use warden_util::AppId;

/// Time limit and consumption for a single app on one day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLimit {
    /// Daily limit in minutes. 0 means no limit is configured.
    pub limit_minutes: u32,
    /// Minutes used today
    pub used_minutes: u32,
}

impl AppLimit {
    pub fn new(limit_minutes: u32, used_minutes: u32) -> Self {
        Self {
            limit_minutes,
            used_minutes,
        }
    }

    /// Whether this app has used strictly more than its configured limit
    pub fn is_exceeded(&self) -> bool {
        self.limit_minutes > 0 && self.used_minutes > self.limit_minutes
    }
}

/// Complete policy as last delivered by the remote store.
///
/// A snapshot is always replaced wholesale; nothing mutates one in place
/// once it has been handed to the policy cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Apps that are blocked regardless of time used
    pub blocked_apps: HashSet<AppId>,

    /// Per-app limits and usage
    pub app_limits: HashMap<AppId, AppLimit>,

    /// Whole-device daily budget in minutes. 0 means no limit.
    pub total_limit_minutes: u32,

    /// Whole-device minutes used today
    pub total_used_minutes: u32,

    /// Modification time of the remote document this snapshot came from
    pub source_time: Option<DateTime<Local>>,

    /// Local day key of the remote document
    pub day: Option<String>,
}

impl PolicySnapshot {
    /// The empty snapshot installed at process start
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, app_id: &AppId) -> bool {
        self.blocked_apps.contains(app_id)
    }

    pub fn limit_for(&self, app_id: &AppId) -> Option<&AppLimit> {
        self.app_limits.get(app_id)
    }

    /// Whether the whole-device budget is strictly exceeded
    pub fn is_total_exceeded(&self) -> bool {
        self.total_limit_minutes > 0 && self.total_used_minutes > self.total_limit_minutes
    }

    /// Whether `self` should be discarded in favor of `current`.
    ///
    /// A document for an earlier day is always older. Within the same day
    /// the last write wins by source time. A snapshot without a source time
    /// is never considered older than anything.
    pub fn is_older_than(&self, current: &PolicySnapshot) -> bool {
        if let (Some(incoming), Some(cached)) = (&self.day, &current.day) {
            // Day keys sort lexically in date order
            if incoming != cached {
                return incoming < cached;
            }
        }

        match (self.source_time, current.source_time) {
            (Some(incoming), Some(cached)) => incoming < cached,
            _ => false,
        }
    }

    /// The same blocklist and limits carried into a new day with all usage
    /// reset to zero.
    ///
    /// The result has no source time, so the first document for the new day
    /// replaces it regardless of when that document was written.
    pub fn rolled_over(&self, day: impl Into<String>) -> Self {
        Self {
            blocked_apps: self.blocked_apps.clone(),
            app_limits: self
                .app_limits
                .iter()
                .map(|(app, limit)| (app.clone(), AppLimit::new(limit.limit_minutes, 0)))
                .collect(),
            total_limit_minutes: self.total_limit_minutes,
            total_used_minutes: 0,
            source_time: None,
            day: Some(day.into()),
        }
    }
}

/// Why the overlay is being shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The foreground app is on the blocklist
    AppBlocked,
    /// The foreground app used more than its daily limit
    AppTimeExceeded,
    /// The device used more than its daily budget
    TotalTimeExceeded,
}

impl BlockReason {
    /// Default overlay text for this reason
    pub fn default_message(&self) -> &'static str {
        match self {
            BlockReason::AppBlocked => "App use is blocked",
            BlockReason::AppTimeExceeded => "App time limit exceeded",
            BlockReason::TotalTimeExceeded => "Today's screen time is used up",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockReason::AppBlocked => "app_blocked",
            BlockReason::AppTimeExceeded => "app_time_exceeded",
            BlockReason::TotalTimeExceeded => "total_time_exceeded",
        };
        f.write_str(s)
    }
}

/// Output of the decision engine for one sampling tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EnforcementDecision {
    /// Leave the overlay as it is
    NoAction,
    /// Show the overlay, or update its message if already shown
    Block { reason: BlockReason, message: String },
    /// Hide the overlay
    Unblock,
}

impl EnforcementDecision {
    pub fn block(reason: BlockReason, message: impl Into<String>) -> Self {
        Self::Block {
            reason,
            message: message.into(),
        }
    }

    pub fn block_reason(&self) -> Option<BlockReason> {
        match self {
            Self::Block { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// State of the single blocking overlay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayState {
    pub visible: bool,
    pub message: String,
}

impl OverlayState {
    pub fn hidden() -> Self {
        Self::default()
    }

    pub fn shown(message: impl Into<String>) -> Self {
        Self {
            visible: true,
            message: message.into(),
        }
    }
}

/// One reading of the foreground app. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundSample {
    pub app_id: AppId,
    pub observed_at: DateTime<Local>,
}

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    /// Initial policy fetch in progress
    Starting,
    Running,
    /// Waiting for the sampling loop to reach a tick boundary
    Stopping,
}

impl LifecycleState {
    /// Whether `start()` should be a no-op in this state
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Running)
    }
}

/// Whether decisions are acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// No policy received yet: sample and aggregate, never enforce
    ObserveOnly,
    Enforcing,
}

/// Permission the host must grant for the engine to work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Reading the OS usage-event log
    UsageAccess,
    /// Drawing the system-level overlay
    DrawOverlay,
}

/// Aggregated usage of one app on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUsageMinutes {
    pub app_id: AppId,
    pub minutes: u32,
}

/// Aggregated local usage pushed to the remote store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Local day key the usage belongs to
    pub day: String,
    pub apps: Vec<AppUsageMinutes>,
    pub total_minutes: u32,
}

impl UsageReport {
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.total_minutes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn app_limit_zero_means_unlimited() {
        assert!(!AppLimit::new(0, 10_000).is_exceeded());
        assert!(!AppLimit::new(30, 30).is_exceeded());
        assert!(AppLimit::new(30, 31).is_exceeded());
    }

    #[test]
    fn total_exceeded_is_strict() {
        let mut snapshot = PolicySnapshot {
            total_limit_minutes: 480,
            total_used_minutes: 480,
            ..Default::default()
        };
        assert!(!snapshot.is_total_exceeded());

        snapshot.total_used_minutes = 481;
        assert!(snapshot.is_total_exceeded());

        snapshot.total_limit_minutes = 0;
        assert!(!snapshot.is_total_exceeded());
    }

    #[test]
    fn older_source_time_is_stale() {
        let older = PolicySnapshot {
            source_time: Some(Local.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()),
            ..Default::default()
        };
        let newer = PolicySnapshot {
            source_time: Some(Local.with_ymd_and_hms(2025, 1, 1, 10, 0, 5).unwrap()),
            ..Default::default()
        };

        assert!(older.is_older_than(&newer));
        assert!(!newer.is_older_than(&older));
        assert!(!newer.is_older_than(&newer.clone()));
        assert!(!PolicySnapshot::empty().is_older_than(&newer));
    }

    #[test]
    fn earlier_day_is_stale_regardless_of_time() {
        let yesterday = PolicySnapshot {
            source_time: Some(Local.with_ymd_and_hms(2025, 1, 1, 23, 59, 0).unwrap()),
            day: Some("2025-01-01".into()),
            ..Default::default()
        };
        let today = PolicySnapshot {
            source_time: Some(Local.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap()),
            day: Some("2025-01-02".into()),
            ..Default::default()
        };

        assert!(yesterday.is_older_than(&today));
        assert!(!today.is_older_than(&yesterday));
    }

    #[test]
    fn rollover_resets_usage_keeps_limits() {
        let mut snapshot = PolicySnapshot {
            total_limit_minutes: 120,
            total_used_minutes: 130,
            source_time: Some(Local.with_ymd_and_hms(2025, 1, 1, 22, 0, 0).unwrap()),
            day: Some("2025-01-01".into()),
            ..Default::default()
        };
        snapshot.blocked_apps.insert(AppId::new("com.game.x"));
        snapshot
            .app_limits
            .insert(AppId::new("com.chat.z"), AppLimit::new(30, 45));

        let next = snapshot.rolled_over("2025-01-02");
        assert!(next.is_blocked(&AppId::new("com.game.x")));
        assert_eq!(
            next.limit_for(&AppId::new("com.chat.z")),
            Some(&AppLimit::new(30, 0))
        );
        assert_eq!(next.total_limit_minutes, 120);
        assert_eq!(next.total_used_minutes, 0);
        assert_eq!(next.source_time, None);
        assert_eq!(next.day.as_deref(), Some("2025-01-02"));
        assert!(!next.is_older_than(&snapshot));
    }

    #[test]
    fn decision_serializes_with_action_tag() {
        let decision = EnforcementDecision::block(BlockReason::AppBlocked, "blocked");
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "block");
        assert_eq!(json["reason"], "app_blocked");
    }

    #[test]
    fn lifecycle_active_states() {
        assert!(LifecycleState::Starting.is_active());
        assert!(LifecycleState::Running.is_active());
        assert!(!LifecycleState::Stopping.is_active());
        assert!(!LifecycleState::Stopped.is_active());
    }
}
