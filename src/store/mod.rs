// src/store/mod.rs
//! Item State Store: the only shared mutable resource of the poller.
//!
//! Owns `ItemState`, `SentMarker` and `FeedCursor` records. Writes go through
//! `upsert_item_state` (idempotent merge) or `create_marker_if_absent`
//! (create-if-absent); nothing else mutates markers.

pub mod json_file;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::item::{FeedCursor, ItemState, MarkerSet, NotificationKind, SentMarker};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait ItemStateStore: Send + Sync {
    async fn get_item_state(&self, id: &str) -> Result<Option<ItemState>, StoreError>;

    /// Merge `state` into the stored record. `created_at` is only set on first insert.
    async fn upsert_item_state(&self, state: &ItemState) -> Result<(), StoreError>;

    async fn marker_exists(&self, id: &str, kind: NotificationKind) -> Result<bool, StoreError>;

    /// Returns `true` if the marker was created, `false` if it already existed.
    async fn create_marker_if_absent(&self, marker: &SentMarker) -> Result<bool, StoreError>;

    async fn get_feed_cursor(&self, source_url: &str) -> Result<Option<FeedCursor>, StoreError>;

    async fn set_feed_cursor(&self, cursor: &FeedCursor) -> Result<(), StoreError>;

    /// Whether `create_marker_if_absent` is atomic. When `false` the commit
    /// engine guards read-check-write with a per-item lock.
    fn supports_atomic_create(&self) -> bool {
        true
    }

    async fn markers_for(&self, id: &str) -> Result<MarkerSet, StoreError> {
        let mut set = MarkerSet::empty();
        for kind in [NotificationKind::Initial, NotificationKind::StatusChange] {
            if self.marker_exists(id, kind).await? {
                set.insert(kind);
            }
        }
        Ok(set)
    }
}

/// Merge rule shared by the store implementations.
pub(crate) fn merge_state(existing: Option<&ItemState>, incoming: &ItemState) -> ItemState {
    let created_at = existing
        .and_then(|e| e.created_at)
        .or(incoming.created_at)
        .unwrap_or(incoming.last_updated_at);
    ItemState {
        created_at: Some(created_at),
        ..incoming.clone()
    }
}
