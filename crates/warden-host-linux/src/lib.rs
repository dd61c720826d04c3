//! Linux/Sway host for warden
//!
//! Provides:
//! - Foreground tracking from sway window focus events
//! - A full-screen blocking overlay on the layer-shell overlay layer

mod focus;
mod overlay;

pub use focus::*;
pub use overlay::*;
