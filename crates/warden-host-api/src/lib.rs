//! Host interfaces for warden
//!
//! This crate defines the seam between the enforcement engine and the
//! platform: how the foreground app is observed and how the blocking overlay
//! is drawn. It contains no platform code itself.

mod event_log;
mod mock;
mod sampler;
mod traits;

pub use event_log::*;
pub use mock::*;
pub use sampler::*;
pub use traits::*;
