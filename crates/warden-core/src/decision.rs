//! Enforcement decisions

use tracing::trace;
use warden_api::{BlockReason, EnforcementDecision, PolicySnapshot};
use warden_config::BlockMessages;
use warden_util::AppId;

/// Turns a foreground reading and a policy snapshot into a decision
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    messages: BlockMessages,
}

impl DecisionEngine {
    pub fn new(messages: BlockMessages) -> Self {
        Self { messages }
    }

    /// Rules are checked in order and the first match wins:
    ///
    /// 1. No foreground app: `NoAction`, whatever the overlay shows
    /// 2. App on the blocklist: `Block(AppBlocked)`
    /// 3. App used more than its non-zero limit: `Block(AppTimeExceeded)`
    /// 4. Device used more than its non-zero budget: `Block(TotalTimeExceeded)`
    /// 5. Otherwise `Unblock` if the overlay is up, else `NoAction`
    pub fn decide(
        &self,
        current: Option<&AppId>,
        snapshot: &PolicySnapshot,
        overlay_visible: bool,
    ) -> EnforcementDecision {
        let Some(app_id) = current else {
            return EnforcementDecision::NoAction;
        };

        let reason = if snapshot.is_blocked(app_id) {
            Some(BlockReason::AppBlocked)
        } else if snapshot
            .limit_for(app_id)
            .is_some_and(|limit| limit.is_exceeded())
        {
            Some(BlockReason::AppTimeExceeded)
        } else if snapshot.is_total_exceeded() {
            Some(BlockReason::TotalTimeExceeded)
        } else {
            None
        };

        let decision = match reason {
            Some(reason) => EnforcementDecision::block(reason, self.messages.message_for(reason)),
            None if overlay_visible => EnforcementDecision::Unblock,
            None => EnforcementDecision::NoAction,
        };

        trace!(app_id = %app_id, decision = ?decision, "Decided");
        decision
    }
}
