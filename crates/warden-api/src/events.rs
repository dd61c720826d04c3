//! Event types streamed from the engine to UI subscribers

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use warden_util::AppId;

use crate::{BlockReason, EnforcementMode, LifecycleState, PermissionKind, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: warden_util::now(),
            payload,
        }
    }
}

/// All events the engine publishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Supervisor moved to a new lifecycle state
    LifecycleChanged { state: LifecycleState },

    /// Enforcement switched between observe-only and enforcing
    ModeChanged { mode: EnforcementMode },

    /// A remote policy snapshot was installed in the cache
    PolicyApplied {
        source_time: Option<DateTime<Local>>,
        blocked_count: usize,
        limit_count: usize,
    },

    /// A remote snapshot older than the cached one was ignored
    StalePolicyIgnored {
        incoming: Option<DateTime<Local>>,
        cached: Option<DateTime<Local>>,
    },

    /// A malformed remote document was discarded
    PolicyRejected { reason: String },

    /// The overlay became visible
    OverlayShown {
        reason: BlockReason,
        app_id: Option<AppId>,
        message: String,
    },

    /// The overlay message changed while it stayed visible
    OverlayUpdated { message: String },

    /// The overlay was removed
    OverlayHidden,

    /// A permission is missing; the surrounding app should prompt for it
    PermissionRequired { permission: PermissionKind },

    /// Aggregated usage was merged into the remote document
    UsagePushed {
        day: String,
        app_count: usize,
        total_minutes: u32,
    },

    /// Pushing usage failed and will be retried
    UsagePushFailed { attempt: u32, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_is_tagged() {
        let event = Event::new(EventPayload::PermissionRequired {
            permission: PermissionKind::DrawOverlay,
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["api_version"], API_VERSION);
        assert_eq!(json["payload"]["type"], "permission_required");
        assert_eq!(json["payload"]["permission"], "draw_overlay");
    }

    #[test]
    fn event_roundtrip() {
        let payload = EventPayload::OverlayShown {
            reason: BlockReason::TotalTimeExceeded,
            app_id: Some(AppId::new("com.app.x")),
            message: "done for today".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        let parsed: EventPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }
}
