//! # Item model
//! Content items as observed from a source, plus the records the store keeps
//! about them (`ItemState`, `SentMarker`, `FeedCursor`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Suffix appended to an item id to build the `status_change` marker key.
pub const STATUS_CHANGE_SUFFIX: &str = "_live";

/// Broadcast/publication stage of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Upcoming,
    Live,
    /// Ordinary completed video or published article.
    Final,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Upcoming => "upcoming",
            LifecycleState::Live => "live",
            LifecycleState::Final => "final",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Video,
    Feed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// First sighting of an item, whatever its lifecycle stage.
    Initial,
    /// The `upcoming -> live` transition.
    StatusChange,
}

impl NotificationKind {
    /// Store key of the marker for `(item_id, self)`.
    pub fn marker_key(self, item_id: &str) -> String {
        match self {
            NotificationKind::Initial => item_id.to_string(),
            NotificationKind::StatusChange => format!("{item_id}{STATUS_CHANGE_SUFFIX}"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Initial => "initial",
            NotificationKind::StatusChange => "status_change",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of content fetched from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Source-unique, immutable key used for state and markers.
    pub id: String,
    /// Identifier published by the source itself (RSS `guid`, video id), if any.
    pub guid: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub lifecycle: LifecycleState,
    pub source_kind: SourceKind,
}

impl Item {
    /// Builds a video item; the video id doubles as guid.
    pub fn video(
        id: impl Into<String>,
        title: impl Into<String>,
        lifecycle: LifecycleState,
    ) -> Self {
        let id = id.into();
        Self {
            guid: Some(id.clone()),
            id,
            title: title.into(),
            url: None,
            published_at: None,
            lifecycle,
            source_kind: SourceKind::Video,
        }
    }

    /// Builds a feed item. Without a guid the id is derived from link + title.
    pub fn feed(
        guid: Option<String>,
        title: impl Into<String>,
        url: Option<String>,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        let title = title.into();
        let guid = guid.map(|g| g.trim().to_string()).filter(|g| !g.is_empty());
        let id = match &guid {
            Some(g) => g.clone(),
            None => derived_id(url.as_deref().unwrap_or_default(), &title),
        };
        Self {
            id,
            guid,
            title,
            url,
            published_at,
            lifecycle: LifecycleState::Final,
            source_kind: SourceKind::Feed,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }
}

/// Stable id for feed entries that carry no guid.
pub fn derived_id(link: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    hasher.update([0u8]);
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(2 + 24);
    out.push_str("h:");
    for b in digest.iter().take(12) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Store key of `item_id` within `source_name`. Sources never share records,
/// so the same guid cross-posted to two feeds is tracked (and notified) twice.
pub fn scoped_id(source_name: &str, item_id: &str) -> String {
    format!("{source_name}::{item_id}")
}

/// Last-known state of an item (persisted). `id` is the source-scoped key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    pub id: String,
    pub lifecycle: LifecycleState,
    pub title: String,
    pub source_name: String,
    /// Set by the store on first insert; ignored on later upserts.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl ItemState {
    pub fn observed(item: &Item, source_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: scoped_id(source_name, &item.id),
            lifecycle: item.lifecycle,
            title: item.title.clone(),
            source_name: source_name.to_string(),
            created_at: None,
            last_updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarkerMetadata {
    pub source_name: String,
    pub title: String,
    pub destination: String,
}

/// Durable proof that `kind` was delivered for `item_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMarker {
    pub item_id: String,
    pub kind: NotificationKind,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MarkerMetadata,
}

impl SentMarker {
    pub fn key(&self) -> String {
        self.kind.marker_key(&self.item_id)
    }
}

/// Set of notification kinds already committed for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerSet {
    initial: bool,
    status_change: bool,
}

impl MarkerSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: NotificationKind) -> Self {
        self.insert(kind);
        self
    }

    pub fn insert(&mut self, kind: NotificationKind) {
        match kind {
            NotificationKind::Initial => self.initial = true,
            NotificationKind::StatusChange => self.status_change = true,
        }
    }

    pub fn contains(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Initial => self.initial,
            NotificationKind::StatusChange => self.status_change,
        }
    }
}

/// Per-feed bookmark of the newest handled entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCursor {
    pub source_url: String,
    pub last_item_id: Option<String>,
    pub last_publish_date: Option<DateTime<Utc>>,
    pub last_title: Option<String>,
}

impl FeedCursor {
    /// Cursor pointing at `item`.
    pub fn at(source_url: &str, item: &Item) -> Self {
        Self {
            source_url: source_url.to_string(),
            last_item_id: item.guid.clone(),
            last_publish_date: item.published_at,
            last_title: Some(item.title.clone()).filter(|t| !t.trim().is_empty()),
        }
    }
}
