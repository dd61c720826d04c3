//! Remote store errors

use thiserror::Error;
use warden_util::WardenError;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Transient(String),

    #[error("Remote call timed out")]
    Timeout,

    #[error("Invalid document {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Transient(_) | RemoteError::Timeout | RemoteError::Io(_)
        )
    }
}

impl From<RemoteError> for WardenError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Invalid { .. } => WardenError::invalid_snapshot(e.to_string()),
            other => WardenError::transient(other.to_string()),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Transient("offline".into()).is_retryable());
        assert!(!RemoteError::invalid("k", "bad").is_retryable());
    }

    #[test]
    fn maps_into_engine_taxonomy() {
        let e: WardenError = RemoteError::invalid("dev_2024-03-01", "negative").into();
        assert!(matches!(e, WardenError::InvalidSnapshot(_)));

        let e: WardenError = RemoteError::Timeout.into();
        assert!(e.is_retryable());
    }
}
