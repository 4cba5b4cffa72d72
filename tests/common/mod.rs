// tests/common/mod.rs
// Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use feed_herald::error::{DeliveryError, SourceFetchError, StoreError};
use feed_herald::ingest::types::{ContentSource, WatchedFeed, WatchedSource};
use feed_herald::item::{FeedCursor, Item, ItemState, NotificationKind, SentMarker};
use feed_herald::notify::{Destination, Notification, NotificationSink};
use feed_herald::store::{ItemStateStore, MemoryStore};

pub fn log_dest() -> Destination {
    Destination::Log {
        label: "test".into(),
    }
}

/// Source whose next batch (or failure) is set by the test.
pub struct ScriptedSource {
    name: String,
    batch: Mutex<Result<Vec<Item>, String>>,
}

impl ScriptedSource {
    pub fn new(name: &str, items: Vec<Item>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            batch: Mutex::new(Ok(items)),
        })
    }

    pub fn set(&self, items: Vec<Item>) {
        *self.batch.lock() = Ok(items);
    }

    pub fn fail(&self, msg: &str) {
        *self.batch.lock() = Err(msg.to_string());
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch_recent(&self) -> Result<Vec<Item>, SourceFetchError> {
        self.batch
            .lock()
            .clone()
            .map_err(|message| SourceFetchError::Http {
                source_name: self.name.clone(),
                message,
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub fn watched(src: Arc<ScriptedSource>) -> WatchedSource {
    WatchedSource {
        source: src,
        destination: log_dest(),
    }
}

pub fn watched_feed(url: &str, src: Arc<dyn ContentSource>) -> WatchedFeed {
    WatchedFeed {
        url: url.to_string(),
        source: src,
        destination: log_dest(),
    }
}

/// Records every delivered notification; ids in `failing` are rejected.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<HashSet<String>>,
    attempts: Mutex<usize>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, item_id: &str) {
        self.failing.lock().insert(item_id.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    pub fn sent(&self) -> Vec<(String, NotificationKind)> {
        self.sent
            .lock()
            .iter()
            .map(|n| (n.item.id.clone(), n.kind))
            .collect()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, n: &Notification) -> Result<(), DeliveryError> {
        *self.attempts.lock() += 1;
        if self.failing.lock().contains(&n.item.id) {
            return Err(DeliveryError::Status(500));
        }
        self.sent.lock().push(n.clone());
        Ok(())
    }
}

/// Sink that records through `inner` and cancels `token` on the first delivery.
pub struct CancelOnDeliver {
    pub inner: Arc<RecordingSink>,
    pub token: CancellationToken,
}

#[async_trait]
impl NotificationSink for CancelOnDeliver {
    async fn deliver(&self, n: &Notification) -> Result<(), DeliveryError> {
        self.token.cancel();
        self.inner.deliver(n).await
    }
}

/// Memory store whose reads and marker writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_marker_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_marker_writes(&self, on: bool) {
        self.fail_marker_writes.store(on, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemStateStore for FlakyStore {
    async fn get_item_state(&self, id: &str) -> Result<Option<ItemState>, StoreError> {
        self.check_read()?;
        self.inner.get_item_state(id).await
    }

    async fn upsert_item_state(&self, state: &ItemState) -> Result<(), StoreError> {
        self.inner.upsert_item_state(state).await
    }

    async fn marker_exists(&self, id: &str, kind: NotificationKind) -> Result<bool, StoreError> {
        self.check_read()?;
        self.inner.marker_exists(id, kind).await
    }

    async fn create_marker_if_absent(&self, marker: &SentMarker) -> Result<bool, StoreError> {
        if self.fail_marker_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write refused".into()));
        }
        self.inner.create_marker_if_absent(marker).await
    }

    async fn get_feed_cursor(&self, url: &str) -> Result<Option<FeedCursor>, StoreError> {
        self.check_read()?;
        self.inner.get_feed_cursor(url).await
    }

    async fn set_feed_cursor(&self, cursor: &FeedCursor) -> Result<(), StoreError> {
        self.inner.set_feed_cursor(cursor).await
    }
}
