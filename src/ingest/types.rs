// src/ingest/types.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SourceFetchError;
use crate::item::Item;
use crate::notify::Destination;

/// A platform adapter that fetches a bounded list of recent items.
/// Order of the returned items is not significant.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_recent(&self) -> Result<Vec<Item>, SourceFetchError>;
    fn name(&self) -> &str;
}

/// A content source (video channel) and where its notifications go.
#[derive(Clone)]
pub struct WatchedSource {
    pub source: Arc<dyn ContentSource>,
    pub destination: Destination,
}

/// A feed source; `url` keys its `FeedCursor`.
#[derive(Clone)]
pub struct WatchedFeed {
    pub url: String,
    pub source: Arc<dyn ContentSource>,
    pub destination: Destination,
}
