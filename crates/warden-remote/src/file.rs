//! Directory-backed document store
//!
//! Documents live at `<root>/<collection>/<key>.json`. Changes are detected
//! by polling each watched file's modification time and length. Writes go
//! to a temporary file in the same directory which is then renamed over the
//! document, so readers never see a half-written document.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_api::UsageReport;

use crate::{
    merge_usage_into, DocumentSubscription, PolicySource, RemoteDocument, RemoteError,
    RemoteResult, UsageSink, USAGE_COLLECTION,
};

pub struct FileDocumentStore {
    collection_dir: PathBuf,
    poll_interval: Duration,
    /// Serializes read-merge-write cycles within this process
    write_lock: tokio::sync::Mutex<()>,
}

impl FileDocumentStore {
    pub fn new(root: impl AsRef<Path>, poll_interval: Duration) -> Self {
        Self::with_collection(root, USAGE_COLLECTION, poll_interval)
    }

    pub fn with_collection(
        root: impl AsRef<Path>,
        collection: &str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            collection_dir: root.as_ref().join(collection),
            poll_interval,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path of the file backing `key`
    pub fn document_path(&self, key: &str) -> RemoteResult<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
        {
            return Err(RemoteError::invalid(key, "not a valid document key"));
        }
        Ok(self.collection_dir.join(format!("{key}.json")))
    }

    /// Replace a document wholesale
    pub async fn put(&self, key: &str, body: &Value) -> RemoteResult<()> {
        let path = self.document_path(key)?;
        let _guard = self.write_lock.lock().await;
        write_atomic(&path, key, body).await
    }
}

async fn read_document(path: &Path, key: &str) -> RemoteResult<Option<RemoteDocument>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let body: Value =
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::invalid(key, e.to_string()))?;

    Ok(Some(RemoteDocument {
        key: key.to_string(),
        update_time: metadata.modified()?.into(),
        body,
    }))
}

async fn write_atomic(path: &Path, key: &str, body: &Value) -> RemoteResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| RemoteError::invalid(key, "document path has no parent"))?;
    tokio::fs::create_dir_all(dir).await?;

    let bytes =
        serde_json::to_vec_pretty(body).map_err(|e| RemoteError::invalid(key, e.to_string()))?;
    let tmp = dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));

    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    debug!(key = %key, bytes = bytes.len(), "Document written");
    Ok(())
}

#[async_trait]
impl PolicySource for FileDocumentStore {
    async fn fetch(&self, key: &str) -> RemoteResult<Option<RemoteDocument>> {
        let path = self.document_path(key)?;
        read_document(&path, key).await
    }

    async fn subscribe(&self, key: &str) -> RemoteResult<DocumentSubscription> {
        let path = self.document_path(key)?;
        let key = key.to_string();
        let poll_interval = self.poll_interval;
        let (tx, cancel, subscription) = DocumentSubscription::channel();

        info!(key = %key, path = %path.display(), "Watching document");

        tokio::spawn(async move {
            let mut last_seen: Option<(Option<SystemTime>, u64)> = None;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let signature = match tokio::fs::metadata(&path).await {
                    Ok(m) => (m.modified().ok(), m.len()),
                    // Not written yet for this day
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Document watch failed");
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                };
                if last_seen == Some(signature) {
                    continue;
                }

                let item = match read_document(&path, &key).await {
                    Ok(Some(doc)) => Ok(doc),
                    Ok(None) => continue,
                    Err(e) if e.is_retryable() => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Err(e) => Err(e),
                };
                last_seen = Some(signature);

                if tx.send(item).await.is_err() {
                    break;
                }
            }

            debug!(key = %key, "Document watch ended");
        });

        Ok(subscription)
    }
}

#[async_trait]
impl UsageSink for FileDocumentStore {
    async fn merge_usage(&self, key: &str, report: &UsageReport) -> RemoteResult<()> {
        let path = self.document_path(key)?;
        let _guard = self.write_lock.lock().await;

        let mut body = match read_document(&path, key).await? {
            Some(doc) => doc.body,
            None => Value::Object(Map::new()),
        };
        merge_usage_into(key, &mut body, report)?;
        write_atomic(&path, key, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_policy;
    use serde_json::json;
    use warden_api::AppUsageMinutes;
    use warden_util::AppId;

    const KEY: &str = "dev_2024-03-01";

    fn store(dir: &tempfile::TempDir) -> FileDocumentStore {
        FileDocumentStore::new(dir.path(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn fetch_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir).fetch(KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.put(KEY, &json!({"blockedApps": ["com.a"]})).await.unwrap();

        let doc = store.fetch(KEY).await.unwrap().unwrap();
        assert_eq!(doc.key, KEY);
        assert!(dir.path().join("usage").join("dev_2024-03-01.json").exists());

        let snapshot = parse_policy(&doc).unwrap();
        assert!(snapshot.is_blocked(&AppId::new("com.a")));
    }

    #[tokio::test]
    async fn malformed_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.document_path(KEY).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            store.fetch(KEY).await,
            Err(RemoteError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.document_path("../etc/passwd").is_err());
        assert!(store.document_path("").is_err());
        assert!(store.document_path(".hidden").is_err());
    }

    #[tokio::test]
    async fn merge_preserves_existing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .put(
                KEY,
                &json!({
                    "blockedApps": ["com.video.y"],
                    "appUsages": [{"packageName": "com.game.x", "appName": "Game", "timeLimit": 30, "usageTime": 0}],
                    "totalTimeLimit": 90
                }),
            )
            .await
            .unwrap();

        let report = UsageReport {
            day: "2024-03-01".into(),
            apps: vec![AppUsageMinutes { app_id: AppId::new("com.game.x"), minutes: 7 }],
            total_minutes: 7,
        };
        store.merge_usage(KEY, &report).await.unwrap();

        let body = store.fetch(KEY).await.unwrap().unwrap().body;
        assert_eq!(body["blockedApps"], json!(["com.video.y"]));
        assert_eq!(body["totalTimeLimit"], json!(90));
        assert_eq!(body["totalUsageTime"], json!(7));
        assert_eq!(body["appUsages"][0]["timeLimit"], json!(30));
        assert_eq!(body["appUsages"][0]["usageTime"], json!(7));

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("usage"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn merge_creates_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let report = UsageReport {
            day: "2024-03-01".into(),
            apps: vec![],
            total_minutes: 3,
        };
        store.merge_usage(KEY, &report).await.unwrap();
        let body = store.fetch(KEY).await.unwrap().unwrap().body;
        assert_eq!(body["totalUsageTime"], json!(3));
    }

    #[tokio::test]
    async fn subscription_sees_creation_and_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let mut sub = store.subscribe(KEY).await.unwrap();

        store.put(KEY, &json!({"totalTimeLimit": 10})).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first.body["totalTimeLimit"], json!(10));

        // Different length guarantees a new signature even on coarse mtime
        store.put(KEY, &json!({"totalTimeLimit": 120})).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.body["totalTimeLimit"], json!(120));
    }

    #[tokio::test]
    async fn subscription_reports_invalid_and_keeps_watching() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.document_path(KEY).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"garbage").unwrap();

        let mut sub = store.subscribe(KEY).await.unwrap();
        let item = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(item, Err(RemoteError::Invalid { .. })));

        store.put(KEY, &json!({"blockedApps": []})).await.unwrap();
        let item = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert!(item.is_ok());
    }
}
