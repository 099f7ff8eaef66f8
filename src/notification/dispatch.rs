use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{
    DeliveryChannel, DeliveryStatus, FailureCode, NotificationPayload, SessionEvent,
};
use crate::relay::{PushRelay, RelayError, RelayMessage};
use crate::store::SessionBus;

fn failure_code(error: &RelayError) -> FailureCode {
    match error {
        RelayError::HttpError(_) | RelayError::StatusError { .. } => FailureCode::RelayUnavailable,
        RelayError::ParseError(_) => FailureCode::InvalidResponse,
        RelayError::Rejected(_) => FailureCode::Rejected,
    }
}

/// Sends one payload down the channel a recipient registered with.
#[derive(Clone)]
pub struct Dispatcher {
    relay: Arc<dyn PushRelay>,
    sessions: Arc<dyn SessionBus>,
}

impl Dispatcher {
    pub fn new(relay: Arc<dyn PushRelay>, sessions: Arc<dyn SessionBus>) -> Self {
        Self { relay, sessions }
    }

    pub async fn deliver(
        &self,
        recipient: Uuid,
        channel: &DeliveryChannel,
        payload: &NotificationPayload,
    ) -> DeliveryStatus {
        match channel {
            DeliveryChannel::Relay(address) => {
                let message = match RelayMessage::notification(address, payload) {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Failed to build relay message for {}: {}", recipient, e);
                        return DeliveryStatus::Failed(FailureCode::EncodingFailed);
                    }
                };

                match self.relay.send(&message).await {
                    Ok(ticket) => {
                        info!(
                            "Relay accepted notification for {} (ticket {:?})",
                            recipient, ticket.id
                        );
                        DeliveryStatus::Delivered
                    }
                    Err(e) => {
                        error!("Relay delivery to {} failed: {}", recipient, e);
                        DeliveryStatus::Failed(failure_code(&e))
                    }
                }
            }
            DeliveryChannel::Browser(_) => {
                let event = SessionEvent::Notification {
                    payload: payload.clone(),
                };
                match self.sessions.publish(recipient, &event).await {
                    Ok(0) => {
                        warn!("No live browser session for {}", recipient);
                        DeliveryStatus::Failed(FailureCode::NoLiveSession)
                    }
                    Ok(sessions) => {
                        info!(
                            "Delivered notification to {} browser session(s) of {}",
                            sessions, recipient
                        );
                        DeliveryStatus::Delivered
                    }
                    Err(e) => {
                        error!("Browser delivery to {} failed: {}", recipient, e);
                        DeliveryStatus::Failed(FailureCode::SessionBusUnavailable)
                    }
                }
            }
        }
    }

    /// Set the app icon badge on a native device. Browser sessions follow the
    /// counter subscription instead, so there is nothing to send for them.
    pub async fn set_badge(&self, recipient: Uuid, channel: &DeliveryChannel, badge: i64) {
        let DeliveryChannel::Relay(address) = channel else {
            return;
        };

        if let Err(e) = self.relay.send(&RelayMessage::badge_only(address, badge)).await {
            error!("Failed to set badge for {}: {}", recipient, e);
        }
    }
}
