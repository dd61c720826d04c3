//! In-memory document store for testing

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use warden_api::UsageReport;

use crate::{
    merge_usage_into, DocumentSubscription, PolicySource, RemoteDocument, RemoteError,
    RemoteResult, UsageSink,
};

struct Watcher {
    key: String,
    tx: mpsc::Sender<RemoteResult<RemoteDocument>>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    docs: Mutex<HashMap<String, RemoteDocument>>,
    watchers: Mutex<Vec<Watcher>>,
    fail_fetch: Mutex<bool>,
    subscribe_failures: Mutex<u32>,
    push_failures: Mutex<u32>,
    push_delay: Mutex<Option<Duration>>,
    pushes: Mutex<Vec<(String, UsageReport)>>,
    subscribes: Mutex<u32>,
}

/// Document store held in memory, with scriptable failures
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Inner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a document as the parent's UI would, stamped with the current time
    pub fn put(&self, key: &str, body: Value) -> RemoteDocument {
        let mut now = warden_util::now();
        if let Some(existing) = self.get(key) {
            // Keep update times strictly increasing per document
            if now <= existing.update_time {
                now = existing.update_time + chrono::Duration::milliseconds(1);
            }
        }
        self.put_with_time(key, body, now)
    }

    /// Write a document with an explicit update time
    pub fn put_with_time(&self, key: &str, body: Value, update_time: DateTime<Local>) -> RemoteDocument {
        let doc = RemoteDocument {
            key: key.to_string(),
            update_time,
            body,
        };
        self.inner
            .docs
            .lock()
            .unwrap()
            .insert(key.to_string(), doc.clone());
        self.notify(&doc);
        doc
    }

    pub fn get(&self, key: &str) -> Option<RemoteDocument> {
        self.inner.docs.lock().unwrap().get(key).cloned()
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        *self.inner.fail_fetch.lock().unwrap() = fail;
    }

    /// Make the next `n` subscribe calls fail transiently
    pub fn fail_next_subscribes(&self, n: u32) {
        *self.inner.subscribe_failures.lock().unwrap() = n;
    }

    /// Make the next `n` usage pushes fail transiently
    pub fn fail_next_pushes(&self, n: u32) {
        *self.inner.push_failures.lock().unwrap() = n;
    }

    /// Delay every usage push before it writes
    pub fn set_push_delay(&self, delay: Option<Duration>) {
        *self.inner.push_delay.lock().unwrap() = delay;
    }

    /// End every open subscription, as a dropped connection would
    pub fn close_subscriptions(&self) {
        for watcher in self.inner.watchers.lock().unwrap().drain(..) {
            watcher.cancel.cancel();
        }
    }

    /// Successful usage pushes, oldest first
    pub fn pushes(&self) -> Vec<(String, UsageReport)> {
        self.inner.pushes.lock().unwrap().clone()
    }

    /// Subscribe calls made, including failed ones
    pub fn subscribe_count(&self) -> u32 {
        *self.inner.subscribes.lock().unwrap()
    }

    fn notify(&self, doc: &RemoteDocument) {
        let mut watchers = self.inner.watchers.lock().unwrap();
        watchers.retain(|w| !w.cancel.is_cancelled() && !w.tx.is_closed());
        for watcher in watchers.iter().filter(|w| w.key == doc.key) {
            let _ = watcher.tx.try_send(Ok(doc.clone()));
        }
    }

    fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut remaining = counter.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl PolicySource for MemoryDocumentStore {
    async fn fetch(&self, key: &str) -> RemoteResult<Option<RemoteDocument>> {
        if *self.inner.fail_fetch.lock().unwrap() {
            return Err(RemoteError::Transient("Mock fetch failure".into()));
        }
        Ok(self.get(key))
    }

    async fn subscribe(&self, key: &str) -> RemoteResult<DocumentSubscription> {
        *self.inner.subscribes.lock().unwrap() += 1;
        if Self::take_failure(&self.inner.subscribe_failures) {
            return Err(RemoteError::Transient("Mock subscribe failure".into()));
        }

        let (tx, cancel, subscription) = DocumentSubscription::channel();
        if let Some(doc) = self.get(key) {
            let _ = tx.try_send(Ok(doc));
        }

        // Closing the sender is what ends the subscriber's stream
        let watch_cancel = cancel.clone();
        let watch_tx = tx.clone();
        tokio::spawn(async move {
            watch_cancel.cancelled().await;
            drop(watch_tx);
        });

        self.inner.watchers.lock().unwrap().push(Watcher {
            key: key.to_string(),
            tx,
            cancel,
        });
        Ok(subscription)
    }
}

#[async_trait]
impl UsageSink for MemoryDocumentStore {
    async fn merge_usage(&self, key: &str, report: &UsageReport) -> RemoteResult<()> {
        let delay = *self.inner.push_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.inner.push_failures) {
            return Err(RemoteError::Transient("Mock push failure".into()));
        }

        let mut body = self
            .get(key)
            .map(|doc| doc.body)
            .unwrap_or_else(|| Value::Object(Map::new()));
        merge_usage_into(key, &mut body, report)?;
        self.put(key, body);

        self.inner
            .pushes
            .lock()
            .unwrap()
            .push((key.to_string(), report.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "dev_2024-03-01";

    #[tokio::test]
    async fn subscription_gets_current_then_updates() {
        let store = MemoryDocumentStore::new();
        store.put(KEY, json!({"totalTimeLimit": 10}));

        let mut sub = store.subscribe(KEY).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.body["totalTimeLimit"], json!(10));

        store.put("other_2024-03-01", json!({}));
        store.put(KEY, json!({"totalTimeLimit": 20}));
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.body["totalTimeLimit"], json!(20));
        assert!(second.update_time > first.update_time);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let store = MemoryDocumentStore::new();
        let mut sub = store.subscribe(KEY).await.unwrap();
        store.close_subscriptions();
        let end = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn scripted_failures() {
        let store = MemoryDocumentStore::new();
        store.fail_next_subscribes(1);
        assert!(store.subscribe(KEY).await.is_err());
        assert!(store.subscribe(KEY).await.is_ok());
        assert_eq!(store.subscribe_count(), 2);

        store.fail_next_pushes(1);
        let report = UsageReport::default();
        assert!(store.merge_usage(KEY, &report).await.is_err());
        assert!(store.merge_usage(KEY, &report).await.is_ok());
        assert_eq!(store.pushes().len(), 1);

        store.set_fail_fetch(true);
        assert!(store.fetch(KEY).await.is_err());
    }
}
