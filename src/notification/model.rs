use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Addresses starting with this prefix belong to the browser channel and are
/// never handed to the native push relay.
pub const WEB_ADDRESS_PREFIX: &str = "web-";

/// Platform tag recorded when a device registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Native,
}

impl Platform {
    /// Parse a stored platform tag. Tokens imported from the mobile app carry
    /// the OS name it reported, so `ios` and `android` map to `native`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "web" => Some(Platform::Web),
            "native" | "ios" | "android" => Some(Platform::Native),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Platform::Web => "web",
            Platform::Native => "native",
        }
    }
}

/// Where a recipient's notifications go. Chosen from the platform tag when the
/// token is registered and carried with the token from then on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryChannel {
    /// Hosted push relay, addressed by a native push token.
    Relay(String),
    /// Live browser sessions of the recipient.
    Browser(String),
}

impl DeliveryChannel {
    /// Returns `None` when the address does not follow the convention of its
    /// platform tag.
    pub fn select(platform: Platform, address: &str) -> Option<Self> {
        if address.is_empty() {
            return None;
        }

        let web_address = address.starts_with(WEB_ADDRESS_PREFIX);
        match platform {
            Platform::Web if web_address => Some(DeliveryChannel::Browser(address.to_string())),
            Platform::Native if !web_address => Some(DeliveryChannel::Relay(address.to_string())),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryChannel::Relay(_) => "relay",
            DeliveryChannel::Browser(_) => "browser",
        }
    }
}

/// Current push address of a user. One per user, overwritten on every
/// registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserToken {
    pub user_id: Uuid,
    pub address: String,
    pub platform: Platform,
    pub device_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl UserToken {
    pub fn channel(&self) -> Option<DeliveryChannel> {
        DeliveryChannel::select(self.platform, &self.address)
    }
}

/// Per-user unread counter. `unread_count` never goes below zero: it is only
/// ever incremented or reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadCounter {
    pub user_id: Uuid,
    pub unread_count: i64,
    pub last_updated: DateTime<Utc>,
}

impl UnreadCounter {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            unread_count: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Payload carried to each recipient. Field names follow what the mobile and
/// browser clients read from the notification data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub body: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub timestamp: String,
    pub message_title: String,
    pub message_body: String,
    /// Badge hint for the recipient device, not authoritative.
    pub unread_count: i64,
}

impl NotificationPayload {
    pub fn message(sender_id: Uuid, sender_name: &str, title: &str, body: &str) -> Self {
        Self {
            kind: "message".to_string(),
            title: title.to_string(),
            body: body.to_string(),
            sender_id,
            sender_name: sender_name.to_string(),
            timestamp: iso_timestamp(Utc::now()),
            message_title: title.to_string(),
            message_body: body.to_string(),
            unread_count: 1,
        }
    }

    pub fn with_badge(&self, unread_count: i64) -> Self {
        Self {
            unread_count,
            ..self.clone()
        }
    }
}

pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Events pushed to a user's live sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Notification { payload: NotificationPayload },
    Confirmation {
        title: String,
        body: String,
        delivered: usize,
    },
    SignedOut,
}

/// Entry in the session-local inbox. Only kept in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InboxEntry {
    pub id: String,
    pub title: String,
    pub body: String,
    pub sender_name: String,
    pub timestamp: String,
    pub message_title: Option<String>,
    pub read: bool,
}

impl InboxEntry {
    pub fn received(payload: &NotificationPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: payload.title.clone(),
            body: payload.body.clone(),
            sender_name: payload.sender_name.clone(),
            timestamp: payload.timestamp.clone(),
            message_title: Some(payload.message_title.clone()),
            read: false,
        }
    }

    pub fn sent(sender_name: &str, title: &str, body: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: "Message Sent".to_string(),
            body: body.to_string(),
            sender_name: sender_name.to_string(),
            timestamp: iso_timestamp(Utc::now()),
            message_title: Some(title.to_string()),
            read: false,
        }
    }
}

/// Why a dispatch failed. The relay's own wording stays in the logs since it
/// can echo the recipient's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Browser recipient without an open session.
    NoLiveSession,
    /// The relay refused the message, e.g. an unregistered device.
    Rejected,
    /// Transport error or non-2xx status from the relay.
    RelayUnavailable,
    /// The relay answered with something that is not a push ticket.
    InvalidResponse,
    SessionBusUnavailable,
    EncodingFailed,
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(FailureCode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub channel: &'static str,
    pub status: DeliveryStatus,
}

/// One failed recipient as reported to the sender. Carries no recipient
/// identity.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DeliveryFailure {
    pub channel: String,
    pub code: FailureCode,
}

/// Aggregated outcome of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct FanOutReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl FanOutReport {
    pub fn from_outcomes(outcomes: Vec<DeliveryOutcome>) -> Self {
        let mut report = FanOutReport {
            attempted: outcomes.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            match outcome.status {
                DeliveryStatus::Delivered => report.delivered += 1,
                DeliveryStatus::Failed(code) => report.failures.push(DeliveryFailure {
                    channel: outcome.channel.to_string(),
                    code,
                }),
            }
        }

        report
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastOutcome {
    /// Nobody else has a usable address. Nothing was sent.
    NoRecipients,
    Sent(FanOutReport),
}

// Request DTOs
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterDeviceRequest {
    pub platform: Platform,
    /// Push token from the platform. Missing when the user declined the
    /// notification permission. Ignored for web, which gets a synthesized one.
    pub address: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    pub title: String,
    pub body: String,
}

// Response DTOs
#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterDeviceResponse {
    pub registered: bool,
    pub address: Option<String>,
    pub platform: Option<Platform>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BroadcastResponse {
    /// `sent` or `no_recipients`
    pub status: String,
    /// True when at least one recipient got the message and the compose form
    /// can be cleared.
    pub clear_input: bool,
    pub report: FanOutReport,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
    #[schema(value_type = DateTimeWrapper)]
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InboxResponse {
    pub unread_count: i64,
    pub entries: Vec<InboxEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid delivery address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!(Platform::parse("web"), Some(Platform::Web));
        assert_eq!(Platform::parse("native"), Some(Platform::Native));
        assert_eq!(Platform::parse("iOS"), Some(Platform::Native));
        assert_eq!(Platform::parse("android"), Some(Platform::Native));
        assert_eq!(Platform::parse("windows"), None);
    }

    #[test]
    fn test_channel_selection_follows_address_convention() {
        assert_eq!(
            DeliveryChannel::select(Platform::Native, "ExponentPushToken[xyz]"),
            Some(DeliveryChannel::Relay("ExponentPushToken[xyz]".to_string()))
        );
        assert_eq!(
            DeliveryChannel::select(Platform::Web, "web-123"),
            Some(DeliveryChannel::Browser("web-123".to_string()))
        );

        // Mismatched tag and address are dropped
        assert_eq!(DeliveryChannel::select(Platform::Native, "web-123"), None);
        assert_eq!(
            DeliveryChannel::select(Platform::Web, "ExponentPushToken[xyz]"),
            None
        );
        assert_eq!(DeliveryChannel::select(Platform::Native, ""), None);
    }

    #[test]
    fn test_payload_serializes_client_field_names() {
        let sender = Uuid::new_v4();
        let payload = NotificationPayload::message(sender, "alice@example.com", "Hi", "Hello")
            .with_badge(4);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["senderId"], sender.to_string());
        assert_eq!(json["senderName"], "alice@example.com");
        assert_eq!(json["messageTitle"], "Hi");
        assert_eq!(json["messageBody"], "Hello");
        assert_eq!(json["unreadCount"], 4);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_session_event_tagging() {
        let json = serde_json::to_string(&SessionEvent::SignedOut).unwrap();
        assert_eq!(json, r#"{"type":"signed_out"}"#);

        let event = SessionEvent::Confirmation {
            title: "Message Sent".to_string(),
            body: "sent".to_string(),
            delivered: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "confirmation");
        assert_eq!(json["delivered"], 2);
    }

    #[test]
    fn test_report_aggregation() {
        let report = FanOutReport::from_outcomes(vec![
            DeliveryOutcome {
                channel: "relay",
                status: DeliveryStatus::Delivered,
            },
            DeliveryOutcome {
                channel: "relay",
                status: DeliveryStatus::Failed(FailureCode::RelayUnavailable),
            },
            DeliveryOutcome {
                channel: "browser",
                status: DeliveryStatus::Failed(FailureCode::NoLiveSession),
            },
        ]);

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 2);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["failures"][0],
            serde_json::json!({ "channel": "relay", "code": "relay_unavailable" })
        );
        assert_eq!(json["failures"][1]["code"], "no_live_session");
    }

    #[test]
    fn test_inbox_entries_get_distinct_ids() {
        let payload = NotificationPayload::message(Uuid::new_v4(), "alice", "Hi", "Hello");
        let first = InboxEntry::received(&payload);
        let second = InboxEntry::received(&payload);
        assert_ne!(first.id, second.id);
        assert_ne!(
            InboxEntry::sent("alice", "Hi", "Hello").id,
            InboxEntry::sent("alice", "Hi", "Hello").id
        );
    }
}
