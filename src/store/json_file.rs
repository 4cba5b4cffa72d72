// src/store/json_file.rs
//! Single-file JSON persistence. The full document is kept in memory and
//! rewritten (temp file + rename) after every mutation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::{fs, sync::Mutex};

use super::{merge_state, ItemStateStore};
use crate::error::StoreError;
use crate::item::{FeedCursor, ItemState, NotificationKind, SentMarker};

pub const DEFAULT_STATE_PATH: &str = "state/feed_herald.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    items: BTreeMap<String, ItemState>,
    #[serde(default)]
    markers: BTreeMap<String, SentMarker>,
    #[serde(default)]
    cursors: BTreeMap<String, FeedCursor>,
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => Document::default(),
            Ok(s) => serde_json::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            target: "store",
            path = %path.display(),
            items = doc.items.len(),
            markers = doc.markers.len(),
            "state file opened"
        );
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, doc: &Document) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ItemStateStore for JsonFileStore {
    async fn get_item_state(&self, id: &str) -> Result<Option<ItemState>, StoreError> {
        Ok(self.doc.lock().await.items.get(id).cloned())
    }

    async fn upsert_item_state(&self, state: &ItemState) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        let merged = merge_state(doc.items.get(&state.id), state);
        if doc.items.get(&state.id) == Some(&merged) {
            return Ok(());
        }
        let mut next = doc.clone();
        next.items.insert(state.id.clone(), merged);
        self.persist(&next).await?;
        *doc = next;
        Ok(())
    }

    async fn marker_exists(&self, id: &str, kind: NotificationKind) -> Result<bool, StoreError> {
        Ok(self
            .doc
            .lock()
            .await
            .markers
            .contains_key(&kind.marker_key(id)))
    }

    async fn create_marker_if_absent(&self, marker: &SentMarker) -> Result<bool, StoreError> {
        let mut doc = self.doc.lock().await;
        let key = marker.key();
        if doc.markers.contains_key(&key) {
            return Ok(false);
        }
        let mut next = doc.clone();
        next.markers.insert(key, marker.clone());
        self.persist(&next).await?;
        *doc = next;
        Ok(true)
    }

    async fn get_feed_cursor(&self, source_url: &str) -> Result<Option<FeedCursor>, StoreError> {
        Ok(self.doc.lock().await.cursors.get(source_url).cloned())
    }

    async fn set_feed_cursor(&self, cursor: &FeedCursor) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        next.cursors
            .insert(cursor.source_url.clone(), cursor.clone());
        self.persist(&next).await?;
        *doc = next;
        Ok(())
    }
}
