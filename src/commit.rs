//! # Dedup/Commit Engine
//! Sole writer of `SentMarker`s. Call `commit` only after the sink confirmed
//! delivery; a failed send must leave the marker absent so the next cycle retries.
//!
//! Stores that cannot create atomically get a read-check-write under a
//! per-item async lock. That lock only covers this process.

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StoreError;
use crate::item::{MarkerMetadata, NotificationKind, SentMarker};
use crate::store::ItemStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Created,
    AlreadyExists,
}

/// Per-item-id lock set for the non-atomic path.
#[derive(Debug, Default)]
struct ItemLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ItemLocks {
    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock();
        map.entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the entry once nobody else holds or waits on it.
    fn release(&self, id: &str) {
        let mut map = self.locks.lock();
        if map.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct CommitEngine {
    store: Arc<dyn ItemStateStore>,
    locks: ItemLocks,
}

impl CommitEngine {
    pub fn new(store: Arc<dyn ItemStateStore>) -> Self {
        Self {
            store,
            locks: ItemLocks::default(),
        }
    }

    pub async fn commit(
        &self,
        item_id: &str,
        kind: NotificationKind,
        metadata: MarkerMetadata,
        sent_at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError> {
        let marker = SentMarker {
            item_id: item_id.to_string(),
            kind,
            sent_at,
            metadata,
        };

        let created = if self.store.supports_atomic_create() {
            self.store.create_marker_if_absent(&marker).await?
        } else {
            self.guarded_create(&marker).await?
        };

        if created {
            tracing::debug!(target: "commit", item_id, %kind, "marker committed");
            Ok(CommitOutcome::Created)
        } else {
            counter!("marker_commit_conflicts_total").increment(1);
            tracing::warn!(target: "commit", item_id, %kind, "marker already present");
            Ok(CommitOutcome::AlreadyExists)
        }
    }

    async fn guarded_create(&self, marker: &SentMarker) -> Result<bool, StoreError> {
        let lock = self.locks.lock_for(&marker.item_id);
        let result = {
            let _held = lock.lock().await;
            match self.store.marker_exists(&marker.item_id, marker.kind).await {
                Ok(true) => Ok(false),
                Ok(false) => self.store.create_marker_if_absent(marker).await,
                Err(e) => Err(e),
            }
        };
        drop(lock);
        self.locks.release(&marker.item_id);
        result
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.len()
    }
}
