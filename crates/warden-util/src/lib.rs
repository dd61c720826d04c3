//! Shared utilities for warden
//!
//! This crate provides:
//! - ID types (AppId, DeviceId)
//! - Time utilities (mockable wall clock, local day keys, monotonic time)
//! - Error types
//! - Exponential backoff for remote retries
//! - Default paths for config and data directories

mod backoff;
mod error;
mod ids;
mod paths;
mod time;

pub use backoff::*;
pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
