//! Foreground tracking from sway focus events

use chrono::{DateTime, Local};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_host_api::{UsageEvent, UsageEventLog};
use warden_util::{AppId, Backoff};

#[derive(Debug, Deserialize)]
struct WindowEvent {
    change: String,
    container: Container,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Container {
    app_id: Option<String>,
    window_properties: Option<WindowProperties>,
    focused: bool,
    nodes: Vec<Container>,
    floating_nodes: Vec<Container>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WindowProperties {
    class: Option<String>,
}

impl Container {
    /// Wayland app id, or the X11 class for Xwayland windows
    fn app(&self) -> Option<AppId> {
        self.app_id
            .as_deref()
            .or_else(|| self.window_properties.as_ref()?.class.as_deref())
            .map(AppId::new)
            .filter(|id| !id.is_empty())
    }

    fn find_focused(&self) -> Option<&Container> {
        if self.focused {
            return Some(self);
        }
        self.nodes
            .iter()
            .chain(&self.floating_nodes)
            .find_map(Container::find_focused)
    }
}

/// Translate one line of `swaymsg -t subscribe -m '["window"]'` output
pub fn parse_window_event(line: &str, now: DateTime<Local>) -> Option<UsageEvent> {
    let event: WindowEvent = serde_json::from_str(line).ok()?;
    let app = event.container.app()?;

    match event.change.as_str() {
        "focus" => Some(UsageEvent::foreground(app, now)),
        "close" if event.container.focused => Some(UsageEvent::background(app, now)),
        _ => None,
    }
}

/// Focused app in the output of `swaymsg -t get_tree`
pub fn focused_app_in_tree(tree: &str) -> Option<AppId> {
    let root: Container = serde_json::from_str(tree).ok()?;
    root.find_focused()?.app()
}

/// Feeds sway focus changes into a [`UsageEventLog`].
///
/// The log is marked unavailable while no sway IPC connection exists, which
/// the sampler reports as missing usage access.
pub struct SwayFocusMonitor {
    log: UsageEventLog,
    swaymsg: String,
}

impl SwayFocusMonitor {
    pub fn new(log: UsageEventLog) -> Self {
        Self {
            log,
            swaymsg: "swaymsg".into(),
        }
    }

    pub fn with_program(log: UsageEventLog, swaymsg: impl Into<String>) -> Self {
        Self {
            log,
            swaymsg: swaymsg.into(),
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.follow() => {
                    self.log.set_available(false);
                    match result {
                        Ok(()) => warn!("swaymsg subscription ended"),
                        Err(e) => warn!(error = %e, "swaymsg subscription failed"),
                    }
                }
            }

            let delay = backoff.next_delay();
            debug!(retry_in_ms = delay.as_millis() as u64, "Reconnecting to sway");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.log.set_available(false);
        debug!("Focus monitor stopped");
    }

    async fn follow(&self) -> std::io::Result<()> {
        self.record_current_focus().await;

        let mut child = Command::new(&self.swaymsg)
            .args(["-t", "subscribe", "-m", r#"["window"]"#])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("swaymsg stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        info!("Following sway focus events");
        self.log.set_available(true);

        while let Some(line) = lines.next_line().await? {
            if let Some(event) = parse_window_event(&line, warden_util::now()) {
                debug!(app_id = %event.app_id, kind = ?event.kind, "Focus event");
                self.log.record(event);
            }
        }

        let status = child.wait().await?;
        debug!(status = %status, "swaymsg exited");
        Ok(())
    }

    /// Seed the log with whatever is focused right now, so the first sample
    /// after (re)connecting is not empty
    async fn record_current_focus(&self) {
        let output = Command::new(&self.swaymsg)
            .args(["-t", "get_tree"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let tree = String::from_utf8_lossy(&output.stdout);
                if let Some(app) = focused_app_in_tree(&tree) {
                    self.log.record(UsageEvent::foreground(app, warden_util::now()));
                }
            }
            Ok(output) => debug!(status = %output.status, "swaymsg get_tree failed"),
            Err(e) => debug!(error = %e, "swaymsg get_tree failed"),
        }
    }
}
