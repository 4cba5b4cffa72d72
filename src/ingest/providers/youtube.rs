// src/ingest/providers/youtube.rs
//! Video channel adapter backed by the YouTube Data API v3 `search` endpoint.
//!
//! `snippet.liveBroadcastContent` carries the lifecycle: `upcoming`, `live`,
//! or `none` for ordinary uploads and finished broadcasts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Deserialize;

use crate::error::SourceFetchError;
use crate::ingest::normalize_title;
use crate::ingest::types::ContentSource;
use crate::item::{Item, LifecycleState};

pub const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";
pub const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    #[serde(rename = "liveBroadcastContent", default)]
    live_broadcast_content: Option<String>,
}

fn lifecycle_of(raw: Option<&str>) -> LifecycleState {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("upcoming") => LifecycleState::Upcoming,
        Some("live") => LifecycleState::Live,
        _ => LifecycleState::Final,
    }
}

pub struct YoutubeChannelProvider {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        endpoint: String,
        channel_id: String,
        api_key: String,
        max_results: u32,
    },
}

impl YoutubeChannelProvider {
    pub fn from_fixture(name: impl Into<String>, json: &str) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(json.to_string()),
        }
    }

    pub fn from_api(
        name: impl Into<String>,
        channel_id: impl Into<String>,
        api_key: impl Into<String>,
        max_results: u32,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Http {
                client,
                endpoint: SEARCH_ENDPOINT.to_string(),
                channel_id: channel_id.into(),
                api_key: api_key.into(),
                max_results: max_results.clamp(1, 50),
            },
        }
    }

    /// Point the HTTP mode at another endpoint (local mocks).
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        if let Mode::Http { endpoint, .. } = &mut self.mode {
            *endpoint = url.into();
        }
        self
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<Item>, SourceFetchError> {
        let t0 = std::time::Instant::now();
        let resp: SearchResponse =
            serde_json::from_str(s).map_err(|e| SourceFetchError::Parse {
                source_name: self.name.clone(),
                message: e.to_string(),
            })?;

        let mut out = Vec::with_capacity(resp.items.len());
        for it in resp.items {
            // Channel and playlist hits carry no video id.
            let Some(video_id) = it.id.video_id.filter(|v| !v.is_empty()) else {
                continue;
            };
            let published = it
                .snippet
                .published_at
                .as_deref()
                .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let lifecycle = lifecycle_of(it.snippet.live_broadcast_content.as_deref());
            let mut item = Item::video(&video_id, normalize_title(&it.snippet.title), lifecycle)
                .with_url(format!("{WATCH_URL}{video_id}"));
            item.published_at = published;
            out.push(item);
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        counter!("items_observed_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl ContentSource for YoutubeChannelProvider {
    async fn fetch_recent(&self) -> Result<Vec<Item>, SourceFetchError> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http {
                client,
                endpoint,
                channel_id,
                api_key,
                max_results,
            } => {
                if api_key.trim().is_empty() || channel_id.trim().is_empty() {
                    return Err(SourceFetchError::Config {
                        source_name: self.name.clone(),
                        message: "channel_id and api_key are required".into(),
                    });
                }
                let http_err = |e: reqwest::Error| SourceFetchError::Http {
                    source_name: self.name.clone(),
                    message: e.without_url().to_string(),
                };
                let max = max_results.to_string();
                let resp = client
                    .get(endpoint)
                    .query(&[
                        ("part", "snippet"),
                        ("channelId", channel_id.as_str()),
                        ("order", "date"),
                        ("type", "video"),
                        ("maxResults", max.as_str()),
                        ("key", api_key.as_str()),
                    ])
                    .send()
                    .await
                    .map_err(http_err)?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(SourceFetchError::Status {
                        source_name: self.name.clone(),
                        status: status.as_u16(),
                    });
                }
                let body = resp.text().await.map_err(http_err)?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
