//! Enforcement engine for warden
//!
//! This crate is the heart of warden, containing:
//! - Policy cache with atomic snapshot replacement
//! - Decision engine (blocklist, per-app limit, daily budget, in that order)
//! - Overlay controller running on a dedicated UI thread
//! - Usage aggregation into per-app daily totals
//! - Remote sync: policy pull and usage push
//! - Supervisor (Stopped -> Starting -> Running -> Stopping -> Stopped)

mod aggregate;
mod cache;
mod decision;
mod events;
mod overlay;
mod supervisor;
mod sync;

pub use aggregate::*;
pub use cache::*;
pub use decision::*;
pub use events::*;
pub use overlay::*;
pub use supervisor::*;
pub use sync::*;
