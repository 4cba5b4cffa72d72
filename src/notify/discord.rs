use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::Notification;
use crate::error::DeliveryError;

/// Discord embed titles are capped at 256 chars.
const EMBED_TITLE_MAX: usize = 256;

#[derive(Clone)]
pub struct DiscordNotifier {
    client: Client,
    timeout: Duration,
    max_retries: u8,
    backoff_base_ms: u64,
}

impl DiscordNotifier {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = ms;
        self
    }

    pub async fn send(&self, webhook: &str, n: &Notification) -> Result<(), DeliveryError> {
        let payload = if n.plain {
            DiscordWebhookPayload::plain(n)
        } else {
            DiscordWebhookPayload::embed(n)
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    // 4xx other than rate limiting will not improve on retry.
                    Err(_) if rsp.status().is_client_error() && rsp.status().as_u16() != 429 => {
                        return Err(DeliveryError::Rejected(format!(
                            "Discord webhook HTTP {}",
                            rsp.status().as_u16()
                        )));
                    }
                    Err(_) => DeliveryError::Status(rsp.status().as_u16()),
                },
                Err(e) => DeliveryError::Http(e.without_url().to_string()),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(target: "notify", attempt, error = %err, "discord send retry");
            tokio::time::sleep(Duration::from_millis(
                self.backoff_base_ms << (attempt - 1),
            ))
            .await;
        }
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(n: &Notification) -> Self {
        let title: String = n.headline().chars().take(EMBED_TITLE_MAX).collect();
        let description = format!(
            "**Source:** {}\n**Status:** {}",
            n.source_name, n.item.lifecycle
        );
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title,
                url: n.item.url.clone(),
                description,
                timestamp: n.item.published_at.map(|t| t.to_rfc3339()),
            }],
        }
    }

    /// Fallback rendering: a bare message, no embed.
    fn plain(n: &Notification) -> Self {
        let content = match &n.item.url {
            Some(url) => format!("{}\n{}", n.headline(), url),
            None => n.headline(),
        };
        Self {
            content: Some(content),
            embeds: Vec::new(),
        }
    }
}
