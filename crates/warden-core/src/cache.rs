//! Policy cache
//!
//! Holds the current [`PolicySnapshot`] behind a `watch` channel. Readers get
//! an `Arc` to a complete snapshot and never block writers; a replace swaps
//! the whole snapshot at once, so no reader can observe a half-applied one.

use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use warden_api::PolicySnapshot;

/// Result of [`PolicyCache::replace_if_newer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The snapshot is now current
    Applied,
    /// The snapshot was older than the cached one and was dropped
    Stale { cached: Option<DateTime<Local>> },
}

#[derive(Clone)]
pub struct PolicyCache {
    tx: Arc<watch::Sender<Arc<PolicySnapshot>>>,
    /// Number of swaps so far, clears included
    generation: Arc<AtomicU64>,
    /// Generation of the last clear; a policy is present once past it
    cleared_at: Arc<AtomicU64>,
}

impl PolicyCache {
    /// Create a cache holding the empty snapshot
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(PolicySnapshot::empty()));
        Self {
            tx: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            cleared_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current snapshot
    pub fn get(&self) -> Arc<PolicySnapshot> {
        self.tx.borrow().clone()
    }

    /// Install `snapshot` unconditionally
    pub fn replace(&self, snapshot: PolicySnapshot) {
        let snapshot = Arc::new(snapshot);
        self.tx.send_modify(|current| {
            *current = snapshot;
            self.generation.fetch_add(1, Ordering::SeqCst);
        });
        debug!(generation = self.generation(), "Policy snapshot replaced");
    }

    /// Install `snapshot` unless it is older than the cached one.
    ///
    /// The comparison and the swap happen under the same lock, so two
    /// concurrent writers cannot both win with the older one last.
    pub fn replace_if_newer(&self, snapshot: PolicySnapshot) -> ReplaceOutcome {
        let mut outcome = ReplaceOutcome::Applied;

        self.tx.send_if_modified(|current| {
            if snapshot.is_older_than(current) {
                outcome = ReplaceOutcome::Stale {
                    cached: current.source_time,
                };
                return false;
            }
            *current = Arc::new(snapshot);
            self.generation.fetch_add(1, Ordering::SeqCst);
            true
        });

        outcome
    }

    /// Drop the current policy. Until the next replace the cache holds the
    /// empty snapshot and [`has_policy`](Self::has_policy) is false.
    pub fn clear(&self) {
        self.tx.send_modify(|current| {
            *current = Arc::new(PolicySnapshot::empty());
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.cleared_at.store(generation, Ordering::SeqCst);
        });
        debug!(generation = self.generation(), "Policy cache cleared");
    }

    /// Whether a snapshot has been installed since creation or the last clear
    pub fn has_policy(&self) -> bool {
        self.generation() > self.cleared_at.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Wait until a snapshot has been installed, for at most `timeout`.
    /// Returns whether a policy is present.
    pub async fn wait_for_policy(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let wait = async {
            loop {
                if self.has_policy() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Watch replacements
    pub fn subscribe(&self) -> watch::Receiver<Arc<PolicySnapshot>> {
        self.tx.subscribe()
    }
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new()
    }
}
