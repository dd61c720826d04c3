//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use warden_api::{BlockReason, PermissionKind};
use warden_util::AppId;

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Engine started
    ServiceStarted,

    /// Engine stopped
    ServiceStopped,

    /// Remote policy installed
    PolicyApplied {
        source_time: Option<DateTime<Local>>,
        blocked_count: usize,
        limit_count: usize,
    },

    /// Malformed remote policy discarded
    PolicyRejected { reason: String },

    /// Blocking overlay shown
    OverlayShown {
        reason: BlockReason,
        app_id: Option<AppId>,
    },

    /// Blocking overlay removed
    OverlayHidden,

    /// A permission needed for enforcement is missing
    PermissionMissing { permission: PermissionKind },

    /// Usage merged into the remote document
    UsagePushed { day: String, total_minutes: u32 },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: warden_util::now(),
            event,
        }
    }
}
