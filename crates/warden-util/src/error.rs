//! Error types for warden

use thiserror::Error;

/// Core error taxonomy for the enforcement engine.
///
/// Nothing in the engine treats any of these as fatal: permission errors
/// fail open, transient errors are retried by remote sync, and invalid
/// snapshots are discarded in favor of the last valid one.
#[derive(Debug, Error)]
pub enum WardenError {
    /// OS usage access or overlay permission is missing
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Remote read/write timed out or failed at the transport level
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Malformed remote policy document
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Host error: {0}")]
    HostError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientIo(msg.into())
    }

    pub fn invalid_snapshot(msg: impl Into<String>) -> Self {
        Self::InvalidSnapshot(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn host(msg: impl Into<String>) -> Self {
        Self::HostError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::StoreError(_))
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
