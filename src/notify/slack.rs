use reqwest::Client;

use super::Notification;
use crate::error::DeliveryError;

pub struct SlackNotifier {
    client: Client,
}

impl SlackNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Slack has a single text rendering; `plain` is ignored.
    pub async fn send(&self, webhook_url: &str, n: &Notification) -> Result<(), DeliveryError> {
        let text = match &n.item.url {
            Some(url) => format!("*{}*\n<{}>", n.headline(), url),
            None => format!("*{}*", n.headline()),
        };
        let body = serde_json::json!({ "text": text });

        let rsp = self
            .client
            .post(webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(e.without_url().to_string()))?;
        if !rsp.status().is_success() {
            return Err(DeliveryError::Status(rsp.status().as_u16()));
        }
        Ok(())
    }
}
