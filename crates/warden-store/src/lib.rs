//! Local persistence for warden
//!
//! Provides:
//! - Audit log (append-only)
//! - Usage accounting (per app/day)
//!
//! Policy snapshots are deliberately not stored here; after a restart the
//! engine re-fetches them from the remote store.

mod audit;
mod sqlite;
mod traits;

pub use audit::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;
use warden_util::WardenError;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for WardenError {
    fn from(e: StoreError) -> Self {
        WardenError::store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
