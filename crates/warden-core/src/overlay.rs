//! Overlay controller
//!
//! The blocking surface is owned by a dedicated UI thread. Everything else
//! talks to it through an [`OverlayHandle`], which sends commands over a
//! channel and exposes the resulting [`OverlayState`] through a `watch`.

use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use warden_api::{
    BlockReason, EnforcementDecision, EventPayload, OverlayState, PermissionKind,
};
use warden_host_api::{HostError, OverlaySurface, UiTask};
use warden_store::{AuditEvent, AuditEventType, Store};
use warden_util::{AppId, WardenError};

/// Name of the thread that owns the overlay surface
pub const UI_THREAD_NAME: &str = "warden-ui";

/// What applying a decision did to the surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayOutcome {
    /// Nothing to do
    Unchanged,
    Shown,
    /// Message replaced in place
    Updated,
    Hidden,
    /// Draw-overlay permission is missing; `newly` is set on the first
    /// failure after the permission was last seen working
    PermissionMissing { newly: bool },
    /// The surface reported an error; state is unchanged
    Failed(String),
}

/// Keeps at most one overlay on screen and makes every operation idempotent
pub struct OverlayController {
    surface: Box<dyn OverlaySurface>,
    state: OverlayState,
    permission_missing: bool,
}

impl OverlayController {
    pub fn new(surface: Box<dyn OverlaySurface>) -> Self {
        Self {
            surface,
            state: OverlayState::hidden(),
            permission_missing: false,
        }
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    pub fn apply(&mut self, decision: &EnforcementDecision) -> OverlayOutcome {
        match decision {
            EnforcementDecision::NoAction => OverlayOutcome::Unchanged,
            EnforcementDecision::Block { message, .. } => self.show(message),
            EnforcementDecision::Unblock => self.hide(),
        }
    }

    fn show(&mut self, message: &str) -> OverlayOutcome {
        if self.state.visible && !self.surface.is_alive() {
            warn!("Overlay was dismissed; restoring it");
            self.state = OverlayState::hidden();
        }

        if self.state.visible {
            if self.state.message == message {
                return OverlayOutcome::Unchanged;
            }
            return match self.surface.update_message(message) {
                Ok(()) => {
                    self.state.message = message.to_string();
                    OverlayOutcome::Updated
                }
                Err(e) => OverlayOutcome::Failed(e.to_string()),
            };
        }

        // Permission can be granted at any time, so check on every attempt
        if !self.surface.has_permission() {
            return self.permission_missing();
        }

        match self.surface.show(message) {
            Ok(()) => {
                self.permission_missing = false;
                self.state = OverlayState::shown(message);
                OverlayOutcome::Shown
            }
            Err(HostError::PermissionDenied(_)) => self.permission_missing(),
            Err(e) => OverlayOutcome::Failed(e.to_string()),
        }
    }

    fn permission_missing(&mut self) -> OverlayOutcome {
        let newly = !self.permission_missing;
        self.permission_missing = true;
        OverlayOutcome::PermissionMissing { newly }
    }

    /// Remove the overlay if one is shown
    pub fn hide(&mut self) -> OverlayOutcome {
        if !self.state.visible {
            return OverlayOutcome::Unchanged;
        }
        if !self.surface.is_alive() {
            // Already gone from screen
            self.state = OverlayState::hidden();
            return OverlayOutcome::Hidden;
        }
        match self.surface.hide() {
            Ok(()) => {
                self.state = OverlayState::hidden();
                OverlayOutcome::Hidden
            }
            Err(e) => OverlayOutcome::Failed(e.to_string()),
        }
    }
}

pub(crate) enum OverlayCommand {
    Apply {
        decision: EnforcementDecision,
        app_id: Option<AppId>,
    },
    Hide {
        reply: oneshot::Sender<OverlayOutcome>,
    },
}

/// Where the UI thread reports what it did
#[derive(Clone)]
pub struct OverlayReporter {
    pub events: crate::EventBus,
    pub store: Arc<dyn Store>,
}

impl OverlayReporter {
    fn report(
        &self,
        outcome: &OverlayOutcome,
        reason: Option<BlockReason>,
        app_id: Option<AppId>,
        state: &OverlayState,
    ) {
        match outcome {
            OverlayOutcome::Unchanged => {}
            OverlayOutcome::Shown => {
                let reason = reason.unwrap_or(BlockReason::AppBlocked);
                info!(reason = %reason, app_id = ?app_id, "Overlay shown");
                self.audit(AuditEventType::OverlayShown {
                    reason,
                    app_id: app_id.clone(),
                });
                self.events.publish(EventPayload::OverlayShown {
                    reason,
                    app_id,
                    message: state.message.clone(),
                });
            }
            OverlayOutcome::Updated => {
                debug!(message = %state.message, "Overlay message updated");
                self.events.publish(EventPayload::OverlayUpdated {
                    message: state.message.clone(),
                });
            }
            OverlayOutcome::Hidden => {
                info!("Overlay hidden");
                self.audit(AuditEventType::OverlayHidden);
                self.events.publish(EventPayload::OverlayHidden);
            }
            OverlayOutcome::PermissionMissing { newly } => {
                if *newly {
                    warn!("Draw-overlay permission missing; cannot block");
                    self.audit(AuditEventType::PermissionMissing {
                        permission: PermissionKind::DrawOverlay,
                    });
                    self.events.publish(EventPayload::PermissionRequired {
                        permission: PermissionKind::DrawOverlay,
                    });
                }
            }
            OverlayOutcome::Failed(error) => {
                warn!(error = %error, "Overlay operation failed");
            }
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to record audit event");
        }
    }
}

/// Sending side of the UI thread
#[derive(Clone)]
pub struct OverlayHandle {
    tx: mpsc::UnboundedSender<OverlayCommand>,
    state: watch::Receiver<OverlayState>,
}

impl OverlayHandle {
    /// Start the UI thread owning `surface`. The thread runs its command
    /// loop on the driver the surface asks for.
    pub fn spawn(
        surface: Box<dyn OverlaySurface>,
        reporter: OverlayReporter,
    ) -> Result<(Self, JoinHandle<()>), WardenError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(OverlayState::hidden());
        let driver = surface.ui_driver();
        let controller = OverlayController::new(surface);

        let thread = std::thread::Builder::new()
            .name(UI_THREAD_NAME.into())
            .spawn(move || {
                let task: UiTask = Box::pin(run_ui_loop(controller, rx, state_tx, reporter));
                if let Err(e) = driver.run(task) {
                    error!(error = %e, "UI thread could not run; overlay unavailable");
                }
            })
            .map_err(|e| WardenError::internal(format!("Failed to start UI thread: {e}")))?;

        Ok((
            Self {
                tx,
                state: state_rx,
            },
            thread,
        ))
    }

    /// Queue a decision for the UI thread. Returns false if the thread is gone.
    pub fn dispatch(&self, decision: EnforcementDecision, app_id: Option<AppId>) -> bool {
        if decision == EnforcementDecision::NoAction {
            return true;
        }
        self.tx
            .send(OverlayCommand::Apply { decision, app_id })
            .is_ok()
    }

    /// Remove the overlay and wait until the UI thread has done so
    pub async fn hide(&self) -> Option<OverlayOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(OverlayCommand::Hide { reply }).ok()?;
        rx.await.ok()
    }

    /// A handle whose commands are never processed, so its published state
    /// stays hidden
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<OverlayCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(OverlayState::hidden());
        (Self { tx, state }, rx)
    }

    pub fn state(&self) -> OverlayState {
        self.state.borrow().clone()
    }

    pub fn is_visible(&self) -> bool {
        self.state.borrow().visible
    }

    /// Watch overlay state changes
    pub fn watch(&self) -> watch::Receiver<OverlayState> {
        self.state.clone()
    }
}

async fn run_ui_loop(
    mut controller: OverlayController,
    mut rx: mpsc::UnboundedReceiver<OverlayCommand>,
    state_tx: watch::Sender<OverlayState>,
    reporter: OverlayReporter,
) {
    debug!("UI thread started");

    while let Some(command) = rx.recv().await {
        match command {
            OverlayCommand::Apply { decision, app_id } => {
                let outcome = controller.apply(&decision);
                reporter.report(&outcome, decision.block_reason(), app_id, controller.state());
            }
            OverlayCommand::Hide { reply } => {
                let outcome = controller.hide();
                reporter.report(&outcome, None, None, controller.state());
                let _ = reply.send(outcome);
            }
        }
        state_tx.send_if_modified(|state| {
            if state != controller.state() {
                *state = controller.state().clone();
                true
            } else {
                false
            }
        });
    }

    // Never leave an overlay behind
    let outcome = controller.hide();
    reporter.report(&outcome, None, None, controller.state());
    debug!("UI thread stopped");
}
