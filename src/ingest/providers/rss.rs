// src/ingest/providers/rss.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::SourceFetchError;
use crate::ingest::normalize_title;
use crate::ingest::types::ContentSource;
use crate::item::Item;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

/// RFC 2822 first (RSS; chrono covers obsolete zone names like `GMT`), RFC 3339
/// as a fallback for feeds that ignore the format.
pub fn parse_pub_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Some(secs) = OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
    {
        return DateTime::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc2822(ts)
        .or_else(|_| DateTime::parse_from_rfc3339(ts))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// RSS 2.0 feed provider; fixture mode parses a stored document, HTTP mode fetches `url`.
pub struct RssFeedProvider {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssFeedProvider {
    pub fn from_fixture(name: impl Into<String>, xml: &str) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Http {
                url: url.into(),
                client,
            },
        }
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<Item>, SourceFetchError> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).map_err(|e| SourceFetchError::Parse {
            source_name: self.name.clone(),
            message: e.to_string(),
        })?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_title(it.title.as_deref().unwrap_or_default());
            let guid = it.guid.and_then(|g| g.value);
            let link = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
            if title.is_empty() && guid.is_none() && link.is_none() {
                continue;
            }
            let published = it.pub_date.as_deref().and_then(parse_pub_date);
            out.push(Item::feed(guid, title, link, published));
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        counter!("items_observed_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl ContentSource for RssFeedProvider {
    async fn fetch_recent(&self) -> Result<Vec<Item>, SourceFetchError> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let http_err = |e: reqwest::Error| SourceFetchError::Http {
                    source_name: self.name.clone(),
                    message: e.to_string(),
                };
                let resp = client.get(url).send().await.map_err(http_err)?;
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

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
