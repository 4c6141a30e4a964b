// libs/reminder-cell/src/services/webhook.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::notification::{DispatchError, NotificationDispatcher, NotificationRequest};

/// Posts each notification as JSON to an outbound webhook, which owns
/// rendering and delivery over the requested channel.
pub struct WebhookDispatcher {
    client: Client,
    url: String,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// `None` when no webhook URL is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        if !config.is_notification_webhook_configured() {
            return None;
        }
        Some(Self::new(
            config.notification_webhook_url.clone(),
            config.scheduler.dispatch_timeout(),
        ))
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn send(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
        debug!(
            "Posting {} notification for {} to webhook",
            request.template, request.recipient_id
        );

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    DispatchError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Notification webhook rejected request: {} - {}", status, body);
            return Err(DispatchError::Failed(format!("HTTP {}: {}", status, body)));
        }

        Ok(())
    }
}
