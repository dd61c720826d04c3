//! Full-screen blocking overlay
//!
//! A borderless GTK4 window on the layer-shell overlay layer, anchored to
//! every edge so it covers the whole output including panels. It takes no
//! keyboard focus. The window is built once on the UI thread and then shown,
//! relabelled and hidden in place.

use gtk4::glib;
use gtk4::glib::thread_guard::ThreadGuard;
use gtk4::prelude::*;
use gtk4_layer_shell::{Edge, KeyboardMode, Layer, LayerShell};
use tracing::{debug, info, warn};
use warden_api::PermissionKind;
use warden_host_api::{HostError, HostResult, OverlaySurface, UiDriver, UiTask};

/// Layer-shell namespace the compositor sees for the overlay
pub const OVERLAY_NAMESPACE: &str = "warden-block";

const OVERLAY_CSS: &str = r#"
    .block-overlay {
        background-color: rgba(20, 20, 24, 0.97);
    }

    .block-message {
        color: white;
        font-size: 32px;
        font-weight: bold;
        padding: 48px;
    }
"#;

struct BlockWindow {
    window: gtk4::Window,
    label: gtk4::Label,
}

impl BlockWindow {
    fn build() -> HostResult<Self> {
        let display = gtk4::gdk::Display::default()
            .ok_or_else(|| HostError::Unavailable("no display".into()))?;
        let provider = gtk4::CssProvider::new();
        provider.load_from_data(OVERLAY_CSS);
        gtk4::style_context_add_provider_for_display(
            &display,
            &provider,
            gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
        );

        let label = gtk4::Label::builder()
            .wrap(true)
            .justify(gtk4::Justification::Center)
            .halign(gtk4::Align::Center)
            .valign(gtk4::Align::Center)
            .hexpand(true)
            .vexpand(true)
            .build();
        label.add_css_class("block-message");

        let window = gtk4::Window::builder().decorated(false).build();
        window.add_css_class("block-overlay");

        window.init_layer_shell();
        window.set_layer(Layer::Overlay);
        window.set_namespace(OVERLAY_NAMESPACE);
        for edge in [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right] {
            window.set_anchor(edge, true);
            window.set_margin(edge, 0);
        }
        // Draw over panels instead of beside them
        window.set_exclusive_zone(-1);
        window.set_keyboard_mode(KeyboardMode::None);
        window.set_child(Some(&label));

        debug!("Overlay window built");
        Ok(Self { window, label })
    }
}

/// [`OverlaySurface`] on the wlr layer-shell protocol.
///
/// GTK objects are created lazily on the UI thread and guarded so they are
/// only ever touched there.
#[derive(Default)]
pub struct LayerShellOverlay {
    window: Option<ThreadGuard<BlockWindow>>,
}

impl LayerShellOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn block_window(&self) -> Option<&BlockWindow> {
        self.window.as_ref().map(ThreadGuard::get_ref)
    }
}

impl OverlaySurface for LayerShellOverlay {
    fn has_permission(&self) -> bool {
        gtk4::is_initialized_main_thread() && gtk4_layer_shell::is_supported()
    }

    fn show(&mut self, message: &str) -> HostResult<()> {
        if !self.has_permission() {
            return Err(HostError::PermissionDenied(PermissionKind::DrawOverlay));
        }
        if self.window.is_none() {
            self.window = Some(ThreadGuard::new(BlockWindow::build()?));
        }
        let block = self
            .block_window()
            .ok_or_else(|| HostError::Internal("overlay window missing".into()))?;

        block.label.set_text(message);
        block.window.present();
        info!("Blocking overlay presented");
        Ok(())
    }

    fn update_message(&mut self, message: &str) -> HostResult<()> {
        let block = self
            .block_window()
            .ok_or_else(|| HostError::Overlay("no overlay to update".into()))?;
        block.label.set_text(message);
        Ok(())
    }

    fn hide(&mut self) -> HostResult<()> {
        if let Some(block) = self.block_window() {
            block.window.set_visible(false);
            debug!("Blocking overlay hidden");
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.block_window()
            .is_some_and(|block| block.window.is_visible())
    }

    fn ui_driver(&self) -> Box<dyn UiDriver> {
        Box::new(GtkUiDriver)
    }
}

impl Drop for LayerShellOverlay {
    fn drop(&mut self) {
        if let Some(block) = self.window.take() {
            block.get_ref().window.destroy();
        }
    }
}

/// Runs the UI thread's command loop inside the GTK main context, so the
/// overlay window keeps being drawn while commands are awaited
pub struct GtkUiDriver;

impl UiDriver for GtkUiDriver {
    fn run(self: Box<Self>, task: UiTask) -> HostResult<()> {
        gtk4::init().map_err(|e| HostError::Unavailable(format!("GTK init failed: {e}")))?;
        if !gtk4_layer_shell::is_supported() {
            warn!("Compositor does not support layer-shell; overlays cannot be drawn");
        }

        glib::MainContext::default().block_on(task);
        Ok(())
    }
}
