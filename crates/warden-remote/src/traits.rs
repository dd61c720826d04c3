//! Remote store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use warden_api::UsageReport;

use crate::RemoteResult;

/// Buffered changes per subscription before the producer waits
const SUBSCRIPTION_BUFFER: usize = 16;

/// One version of a remote document
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub key: String,

    /// When the store last modified the document
    pub update_time: DateTime<Local>,

    pub body: serde_json::Value,
}

/// Stream of changes to one document.
///
/// Yields the current version first (if the document exists), then every
/// subsequent version. `None` means the subscription ended and the caller
/// should resubscribe. Dropping the subscription stops the producer.
pub struct DocumentSubscription {
    rx: mpsc::Receiver<RemoteResult<RemoteDocument>>,
    _guard: DropGuard,
}

impl DocumentSubscription {
    /// Create a subscription together with the producer's sending half and
    /// a token that is cancelled once the subscription is dropped
    pub fn channel() -> (
        mpsc::Sender<RemoteResult<RemoteDocument>>,
        CancellationToken,
        Self,
    ) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let sub = Self {
            rx,
            _guard: cancel.clone().drop_guard(),
        };
        (tx, cancel, sub)
    }

    pub async fn next(&mut self) -> Option<RemoteResult<RemoteDocument>> {
        self.rx.recv().await
    }
}

/// Where policy documents come from
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Read the current version of a document, if it exists
    async fn fetch(&self, key: &str) -> RemoteResult<Option<RemoteDocument>>;

    /// Watch a document for changes
    async fn subscribe(&self, key: &str) -> RemoteResult<DocumentSubscription>;
}

/// Where aggregated usage goes
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Merge a usage report into the document, leaving fields the report
    /// does not own untouched
    async fn merge_usage(&self, key: &str, report: &UsageReport) -> RemoteResult<()>;
}
