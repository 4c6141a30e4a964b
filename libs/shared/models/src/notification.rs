use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Delivery channel, taken from the patient's contact preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    #[default]
    InApp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    AppointmentReminder,
    AppointmentCancelled,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::AppointmentReminder => write!(f, "appointment_reminder"),
            Template::AppointmentCancelled => write!(f, "appointment_cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub recipient_id: Uuid,
    pub channel: Channel,
    pub template: Template,
    pub payload: Value,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("Notification delivery failed: {0}")]
    Failed(String),

    #[error("Notification dispatcher timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

/// Best-effort delivery of a single notification. The scheduler decides when
/// and whether a notification goes out; implementations decide how.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, request: &NotificationRequest) -> Result<(), DispatchError>;
}

/// Dispatcher used when no delivery backend is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn send(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
        info!(
            recipient = %request.recipient_id,
            channel = ?request.channel,
            template = %request.template,
            "Notification (log only)"
        );
        Ok(())
    }
}
