pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::notification::model::NotificationPayload;

pub use http::HttpPushRelay;

pub const DEFAULT_RELAY_URL: &str = "https://exp.host/--/api/v2/push/send";

// Seconds the relay keeps an undelivered message
const MESSAGE_TTL_SECONDS: u32 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Relay returned status {status}: {body}")]
    StatusError { status: u16, body: String },

    #[error("Unreadable relay response: {0}")]
    ParseError(String),

    #[error("Relay rejected the message: {0}")]
    Rejected(String),
}

/// Body of one push request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    pub badge: i64,
    pub priority: String,
    pub channel_id: String,
    pub ttl: u32,
}

impl RelayMessage {
    pub fn notification(
        to: &str,
        payload: &NotificationPayload,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            to: to.to_string(),
            title: Some(payload.title.clone()),
            body: Some(payload.body.clone()),
            data: Some(serde_json::to_value(payload)?),
            sound: Some("default".to_string()),
            badge: payload.unread_count,
            priority: "high".to_string(),
            channel_id: "default".to_string(),
            ttl: MESSAGE_TTL_SECONDS,
        })
    }

    /// Silent message that only sets the app icon badge.
    pub fn badge_only(to: &str, badge: i64) -> Self {
        Self {
            to: to.to_string(),
            title: None,
            body: None,
            data: None,
            sound: None,
            badge,
            priority: "high".to_string(),
            channel_id: "default".to_string(),
            ttl: MESSAGE_TTL_SECONDS,
        }
    }
}

/// Ticket the relay hands back for an accepted request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushTicket {
    pub status: String,
    pub id: Option<String>,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    data: PushTicket,
}

/// Interpret a relay response. Anything but a 2xx carrying an `ok` ticket is
/// an error.
pub fn parse_ticket(status: u16, body: &str) -> Result<PushTicket, RelayError> {
    if !(200..300).contains(&status) {
        return Err(RelayError::StatusError {
            status,
            body: body.to_string(),
        });
    }

    let response: RelayResponse =
        serde_json::from_str(body).map_err(|e| RelayError::ParseError(e.to_string()))?;

    if response.data.status == "error" {
        return Err(RelayError::Rejected(
            response
                .data
                .message
                .unwrap_or_else(|| "no reason given".to_string()),
        ));
    }

    Ok(response.data)
}

/// Hosted push relay. Best effort: an `Ok` means the relay accepted the
/// message, not that a device showed it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushRelay: Send + Sync {
    async fn send(&self, message: &RelayMessage) -> Result<PushTicket, RelayError>;
}
