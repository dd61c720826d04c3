//! Remote document store access for warden
//!
//! The parent's UI writes one document per device and day into a shared
//! document store. This crate provides:
//! - The wire format of that document and its validation into a
//!   [`warden_api::PolicySnapshot`]
//! - The field-preserving merge used when reporting usage back
//! - [`PolicySource`] / [`UsageSink`] traits
//! - A directory-backed store and an in-memory store

mod document;
mod error;
mod file;
mod memory;
mod traits;

pub use document::*;
pub use error::*;
pub use file::*;
pub use memory::*;
pub use traits::*;
