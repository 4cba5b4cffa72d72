// src/notify/mod.rs
//! Notification Sink boundary.
//!
//! The poller only sees `NotificationSink`. In the binary that sink is a
//! `ChannelSink`: requests travel over a queue to a delivery worker that owns
//! the webhook clients (`NotifierMux`) and acknowledges each one.

pub mod channel;
pub mod discord;
pub mod slack;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::item::{Item, LifecycleState, NotificationKind, SourceKind};

pub use channel::ChannelSink;
pub use discord::DiscordNotifier;
pub use slack::SlackNotifier;

/// Where a source's notifications are posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    Discord { webhook_url: String },
    Slack { webhook_url: String },
    /// Tracing only; used when no webhook is configured.
    Log {
        #[serde(default)]
        label: String,
    },
}

impl Destination {
    /// Log-safe label (never includes webhook secrets).
    pub fn label(&self) -> String {
        match self {
            Destination::Discord { .. } => "discord".to_string(),
            Destination::Slack { .. } => "slack".to_string(),
            Destination::Log { label } if label.is_empty() => "log".to_string(),
            Destination::Log { label } => format!("log:{label}"),
        }
    }

    /// Only Discord has a second (plain) rendering; Slack and log ignore `plain`.
    pub fn has_plain_rendering(&self) -> bool {
        matches!(self, Destination::Discord { .. })
    }
}

/// One due notification, as handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub destination: Destination,
    pub source_name: String,
    pub item: Item,
    pub kind: NotificationKind,
    /// Request the sink's fallback (plain text) rendering.
    pub plain: bool,
    pub ts: DateTime<Utc>,
}

impl Notification {
    pub fn fallback(&self) -> Self {
        Self {
            plain: true,
            ..self.clone()
        }
    }

    /// One-line summary used by every renderer.
    pub fn headline(&self) -> String {
        let src = &self.source_name;
        let title = &self.item.title;
        match (self.kind, self.item.source_kind, self.item.lifecycle) {
            (NotificationKind::StatusChange, _, _) => format!("{src} is now live: {title}"),
            (_, SourceKind::Feed, _) => format!("{src}: {title}"),
            (_, SourceKind::Video, LifecycleState::Live) => format!("{src} is live: {title}"),
            (_, SourceKind::Video, LifecycleState::Upcoming) => {
                format!("{src} scheduled a stream: {title}")
            }
            (_, SourceKind::Video, LifecycleState::Final) => {
                format!("New video from {src}: {title}")
            }
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, n: &Notification) -> Result<(), DeliveryError>;

    /// Whether the sink honors `Notification::plain` for destinations that
    /// have a plain rendering (see `Destination::has_plain_rendering`).
    fn supports_fallback(&self) -> bool {
        false
    }
}

/// Routes each notification to the notifier matching its destination.
pub struct NotifierMux {
    discord: DiscordNotifier,
    slack: SlackNotifier,
}

impl NotifierMux {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            discord: DiscordNotifier::new(client.clone()),
            slack: SlackNotifier::new(client),
        }
    }

    pub fn with_discord(mut self, discord: DiscordNotifier) -> Self {
        self.discord = discord;
        self
    }
}

#[async_trait]
impl NotificationSink for NotifierMux {
    async fn deliver(&self, n: &Notification) -> Result<(), DeliveryError> {
        match &n.destination {
            Destination::Discord { webhook_url } => self.discord.send(webhook_url, n).await,
            Destination::Slack { webhook_url } => self.slack.send(webhook_url, n).await,
            Destination::Log { label } => {
                tracing::info!(
                    target: "notify",
                    destination = %label,
                    kind = %n.kind,
                    item_id = %n.item.id,
                    url = n.item.url.as_deref().unwrap_or("-"),
                    "{}",
                    n.headline()
                );
                Ok(())
            }
        }
    }

    fn supports_fallback(&self) -> bool {
        true
    }
}
