// src/ingest/config.rs
//! Typed configuration, loaded and validated once at startup.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::providers::{rss::RssFeedProvider, youtube::YoutubeChannelProvider};
use crate::ingest::scheduler::{TriggerPolicy, DEFAULT_INITIAL_DELAY};
use crate::ingest::types::{WatchedFeed, WatchedSource};
use crate::notify::Destination;
use crate::store::json_file::DEFAULT_STATE_PATH;

pub const ENV_CONFIG_PATH: &str = "FEED_HERALD_CONFIG";
pub const ENV_YOUTUBE_API_KEY: &str = "YOUTUBE_API_KEY";

fn default_max_results() -> u32 {
    5
}
fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}
fn default_log_destination() -> Destination {
    Destination::Log {
        label: String::new(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub video_sources: Vec<VideoSourceConfig>,
    #[serde(default)]
    pub feed_sources: Vec<FeedSourceConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub content: Option<TriggerConfig>,
    #[serde(default)]
    pub feeds: Option<TriggerConfig>,
}

/// Exactly one of `interval_ms`, `cron`, `minutes` must be set.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct TriggerConfig {
    pub interval_ms: Option<u64>,
    pub initial_delay_ms: Option<u64>,
    pub cron: Option<String>,
    pub minutes: Option<Vec<u32>>,
}

impl TriggerConfig {
    pub fn policy(&self) -> Result<TriggerPolicy> {
        match (self.interval_ms, self.cron.as_deref(), self.minutes.as_deref()) {
            (Some(ms), None, None) => {
                if ms == 0 {
                    bail!("interval_ms must be greater than zero");
                }
                Ok(TriggerPolicy::Interval {
                    every: Duration::from_millis(ms),
                    initial_delay: self
                        .initial_delay_ms
                        .map(Duration::from_millis)
                        .unwrap_or(DEFAULT_INITIAL_DELAY),
                })
            }
            (None, Some(cron), None) => {
                let cron = cron.trim();
                if cron.is_empty() {
                    bail!("cron pattern is empty");
                }
                Ok(TriggerPolicy::Calendar {
                    cron: cron.to_string(),
                })
            }
            (None, None, Some(minutes)) => TriggerPolicy::at_minutes(minutes),
            _ => Err(anyhow!(
                "set exactly one of interval_ms, cron, minutes"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub fail_open_on_read_error: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            fail_open_on_read_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoSourceConfig {
    pub name: String,
    pub channel_id: String,
    /// "ENV" means: read from YOUTUBE_API_KEY
    pub api_key: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_log_destination")]
    pub destination: Destination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_log_destination")]
    pub destination: Destination,
}

impl AppConfig {
    /// Content-category trigger; defaults to every 5 minutes.
    pub fn content_trigger(&self) -> Result<TriggerPolicy> {
        match &self.scheduler.content {
            Some(t) => t.policy().context("scheduler.content"),
            None => Ok(TriggerPolicy::every(Duration::from_secs(300))),
        }
    }

    /// Feed-category trigger; defaults to every 10 minutes.
    pub fn feed_trigger(&self) -> Result<TriggerPolicy> {
        match &self.scheduler.feeds {
            Some(t) => t.policy().context("scheduler.feeds"),
            None => Ok(TriggerPolicy::every(Duration::from_secs(600))),
        }
    }

    pub fn watched_sources(&self, client: &reqwest::Client) -> Vec<WatchedSource> {
        self.video_sources
            .iter()
            .map(|v| WatchedSource {
                source: Arc::new(YoutubeChannelProvider::from_api(
                    v.name.clone(),
                    v.channel_id.clone(),
                    v.api_key.clone(),
                    v.max_results,
                    client.clone(),
                )),
                destination: v.destination.clone(),
            })
            .collect()
    }

    pub fn watched_feeds(&self, client: &reqwest::Client) -> Vec<WatchedFeed> {
        self.feed_sources
            .iter()
            .map(|f| WatchedFeed {
                url: f.url.clone(),
                source: Arc::new(RssFeedProvider::from_url(
                    f.name.clone(),
                    f.url.clone(),
                    client.clone(),
                )),
                destination: f.destination.clone(),
            })
            .collect()
    }

    fn validate(mut self) -> Result<Self> {
        let mut names = HashSet::new();
        for v in &mut self.video_sources {
            v.name = v.name.trim().to_string();
            if v.name.is_empty() {
                bail!("video source with empty name");
            }
            if v.channel_id.trim().is_empty() {
                bail!("video source {} has no channel_id", v.name);
            }
            if !names.insert(v.name.clone()) {
                bail!("duplicate source name {}", v.name);
            }
            if v.api_key.trim().eq_ignore_ascii_case("env") {
                v.api_key = std::env::var(ENV_YOUTUBE_API_KEY)
                    .map_err(|_| anyhow!("Missing {ENV_YOUTUBE_API_KEY} env var"))?;
            }
            if v.api_key.trim().is_empty() {
                bail!("video source {} has no api_key", v.name);
            }
            v.max_results = v.max_results.clamp(1, 50);
            validate_destination(&v.name, &v.destination)?;
        }
        for f in &mut self.feed_sources {
            f.name = f.name.trim().to_string();
            if f.name.is_empty() {
                bail!("feed source with empty name");
            }
            if f.url.trim().is_empty() {
                bail!("feed source {} has no url", f.name);
            }
            if !names.insert(f.name.clone()) {
                bail!("duplicate source name {}", f.name);
            }
            validate_destination(&f.name, &f.destination)?;
        }
        // Surface trigger mistakes at load time rather than at scheduling.
        self.content_trigger()?;
        self.feed_trigger()?;
        Ok(self)
    }
}

fn validate_destination(source: &str, d: &Destination) -> Result<()> {
    match d {
        Destination::Discord { webhook_url } | Destination::Slack { webhook_url }
            if webhook_url.trim().is_empty() =>
        {
            bail!("source {source} has an empty webhook_url")
        }
        _ => Ok(()),
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $FEED_HERALD_CONFIG
/// 2) config/feed_herald.toml
/// 3) config/feed_herald.json
pub fn load_config_default() -> Result<AppConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/feed_herald.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feed_herald.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Err(anyhow!(
        "no configuration found (set {ENV_CONFIG_PATH} or create config/feed_herald.toml)"
    ))
}

pub fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    let cfg: AppConfig = if hint_ext == "json" {
        serde_json::from_str(s)?
    } else {
        toml::from_str(s)?
    };
    cfg.validate()
}
