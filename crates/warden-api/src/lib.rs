//! Data model and event surface for the warden enforcement engine
//!
//! This crate defines the types shared between the engine and its
//! collaborators:
//! - Policy snapshots and per-app limits
//! - Enforcement decisions and overlay state
//! - Lifecycle states
//! - Events streamed to UI subscribers

mod events;
mod types;

pub use events::*;
pub use types::*;

/// Current event API version
pub const API_VERSION: u32 = 1;
