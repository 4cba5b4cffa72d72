// src/store/memory.rs
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{merge_state, ItemStateStore};
use crate::error::StoreError;
use crate::item::{FeedCursor, ItemState, NotificationKind, SentMarker};

/// In-process store. Every operation takes one lock, so marker creation is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<String, ItemState>,
    markers: HashMap<String, SentMarker>,
    cursors: HashMap<String, FeedCursor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker_count(&self) -> usize {
        self.inner.lock().markers.len()
    }

    pub fn marker(&self, id: &str, kind: NotificationKind) -> Option<SentMarker> {
        self.inner.lock().markers.get(&kind.marker_key(id)).cloned()
    }
}

#[async_trait]
impl ItemStateStore for MemoryStore {
    async fn get_item_state(&self, id: &str) -> Result<Option<ItemState>, StoreError> {
        Ok(self.inner.lock().items.get(id).cloned())
    }

    async fn upsert_item_state(&self, state: &ItemState) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let merged = merge_state(inner.items.get(&state.id), state);
        inner.items.insert(state.id.clone(), merged);
        Ok(())
    }

    async fn marker_exists(&self, id: &str, kind: NotificationKind) -> Result<bool, StoreError> {
        Ok(self.inner.lock().markers.contains_key(&kind.marker_key(id)))
    }

    async fn create_marker_if_absent(&self, marker: &SentMarker) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let key = marker.key();
        if inner.markers.contains_key(&key) {
            return Ok(false);
        }
        inner.markers.insert(key, marker.clone());
        Ok(true)
    }

    async fn get_feed_cursor(&self, source_url: &str) -> Result<Option<FeedCursor>, StoreError> {
        Ok(self.inner.lock().cursors.get(source_url).cloned())
    }

    async fn set_feed_cursor(&self, cursor: &FeedCursor) -> Result<(), StoreError> {
        self.inner
            .lock()
            .cursors
            .insert(cursor.source_url.clone(), cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, LifecycleState, MarkerMetadata};
    use chrono::{Duration, TimeZone, Utc};

    fn state(lifecycle: LifecycleState, at_min: i64) -> ItemState {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(at_min);
        ItemState::observed(&Item::video("v1", "Title", lifecycle), "chan", at)
    }

    #[tokio::test]
    async fn upsert_sets_created_at_only_on_first_insert() {
        let store = MemoryStore::new();
        store.upsert_item_state(&state(LifecycleState::Upcoming, 0)).await.unwrap();
        let first = store.get_item_state("v1").await.unwrap().unwrap();

        store.upsert_item_state(&state(LifecycleState::Live, 10)).await.unwrap();
        let second = store.get_item_state("v1").await.unwrap().unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.lifecycle, LifecycleState::Live);
        assert_eq!(second.last_updated_at, state(LifecycleState::Live, 10).last_updated_at);
    }

    #[tokio::test]
    async fn upsert_same_value_twice_is_idempotent() {
        let store = MemoryStore::new();
        let s = state(LifecycleState::Live, 5);
        store.upsert_item_state(&s).await.unwrap();
        let once = store.get_item_state("v1").await.unwrap();
        store.upsert_item_state(&s).await.unwrap();
        let twice = store.get_item_state("v1").await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn marker_created_once_per_kind() {
        let store = MemoryStore::new();
        let mk = |kind| SentMarker {
            item_id: "v1".into(),
            kind,
            sent_at: Utc::now(),
            metadata: MarkerMetadata::default(),
        };
        assert!(store.create_marker_if_absent(&mk(NotificationKind::Initial)).await.unwrap());
        assert!(!store.create_marker_if_absent(&mk(NotificationKind::Initial)).await.unwrap());
        assert!(store
            .create_marker_if_absent(&mk(NotificationKind::StatusChange))
            .await
            .unwrap());

        let set = store.markers_for("v1").await.unwrap();
        assert!(set.contains(NotificationKind::Initial));
        assert!(set.contains(NotificationKind::StatusChange));
        assert_eq!(store.marker_count(), 2);
    }
}
