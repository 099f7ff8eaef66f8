use chrono::Utc;
use futures::future::join_all;
use rand::{distr::Alphanumeric, Rng};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dispatch::Dispatcher;
use super::inbox::Inbox;
use super::model::{
    BroadcastOutcome, DeliveryChannel, DeliveryOutcome, DeliveryStatus, FanOutReport,
    InboxEntry, NotificationError, NotificationPayload, Platform, SessionEvent, UnreadCounter,
    UserToken, WEB_ADDRESS_PREFIX,
};
use crate::relay::PushRelay;
use crate::store::{CounterStore, SessionBus, StoreError, Subscription, TokenStore};

/// Input for a device registration.
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub platform: Platform,
    pub address: Option<String>,
    pub device_name: Option<String>,
}

/// A recipient that passed the address filter.
#[derive(Debug, Clone)]
struct Recipient {
    user_id: Uuid,
    channel: DeliveryChannel,
}

/// Synthesize an address for a browser session, e.g. `web-1714557600000-k3j9x0a1b`.
pub fn synthesize_web_address() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!(
        "{}{}-{}",
        WEB_ADDRESS_PREFIX,
        Utc::now().timestamp_millis(),
        suffix
    )
}

#[derive(Clone)]
pub struct NotificationService {
    tokens: Arc<dyn TokenStore>,
    counters: Arc<dyn CounterStore>,
    sessions: Arc<dyn SessionBus>,
    dispatcher: Dispatcher,
    inbox: Inbox,
}

impl NotificationService {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        counters: Arc<dyn CounterStore>,
        sessions: Arc<dyn SessionBus>,
        relay: Arc<dyn PushRelay>,
        inbox: Inbox,
    ) -> Self {
        Self {
            tokens,
            counters,
            dispatcher: Dispatcher::new(relay, sessions.clone()),
            sessions,
            inbox,
        }
    }

    /// Store the user's push address and make sure they have a counter.
    ///
    /// Returns `Ok(None)` when a native device came without an address, which
    /// is what happens when the notification permission was declined, and
    /// when the token could not be saved.
    pub async fn register_device(
        &self,
        user_id: Uuid,
        registration: DeviceRegistration,
    ) -> Result<Option<UserToken>, NotificationError> {
        let address = match registration.platform {
            Platform::Web => synthesize_web_address(),
            Platform::Native => match registration.address.map(|a| a.trim().to_string()) {
                Some(address) if !address.is_empty() => address,
                _ => {
                    warn!(
                        "No push address from user {}, notification permission not granted",
                        user_id
                    );
                    return Ok(None);
                }
            },
        };

        if DeliveryChannel::select(registration.platform, &address).is_none() {
            return Err(NotificationError::InvalidAddress(format!(
                "{} addresses must not start with {}",
                registration.platform.as_str(),
                WEB_ADDRESS_PREFIX
            )));
        }

        let token = UserToken {
            user_id,
            address,
            platform: registration.platform,
            device_name: registration.device_name,
            updated_at: Utc::now(),
        };

        if let Err(e) = self.tokens.upsert(&token).await {
            error!("Failed to save token for user {}: {}", user_id, e);
            return Ok(None);
        }

        if let Err(e) = self.counters.ensure(user_id).await {
            error!("Failed to initialize unread counter for {}: {}", user_id, e);
        }

        info!(
            "Registered {} device for user {}",
            token.platform.as_str(),
            user_id
        );
        Ok(Some(token))
    }

    /// Send a message from `sender_id` to every other registered user.
    pub async fn broadcast(
        &self,
        sender_id: Uuid,
        sender_name: &str,
        title: &str,
        body: &str,
    ) -> Result<BroadcastOutcome, NotificationError> {
        let title = title.trim();
        let body = body.trim();
        if title.is_empty() || body.is_empty() {
            return Err(NotificationError::ValidationError(
                "Title and body are required".to_string(),
            ));
        }

        let tokens = match self.tokens.list_all().await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Failed to read user tokens, nothing sent: {}", e);
                return Ok(BroadcastOutcome::NoRecipients);
            }
        };

        let recipients: Vec<Recipient> = tokens
            .into_iter()
            .filter(|token| token.user_id != sender_id)
            .filter_map(|token| {
                let channel = token.channel()?;
                Some(Recipient {
                    user_id: token.user_id,
                    channel,
                })
            })
            .collect();

        if recipients.is_empty() {
            info!("No recipients for message from {}", sender_id);
            return Ok(BroadcastOutcome::NoRecipients);
        }

        info!(
            "Fanning out message from {} to {} recipient(s)",
            sender_id,
            recipients.len()
        );

        // Every recipient needs a counter before anything is sent
        join_all(
            recipients
                .iter()
                .map(|recipient| self.ensure_counter(recipient.user_id)),
        )
        .await;

        let payload = NotificationPayload::message(sender_id, sender_name, title, body);
        let outcomes = join_all(
            recipients
                .iter()
                .map(|recipient| self.deliver_to(recipient, &payload)),
        )
        .await;

        let report = FanOutReport::from_outcomes(outcomes);
        info!(
            "Message from {} delivered to {}/{} recipient(s)",
            sender_id, report.delivered, report.attempted
        );

        if report.delivered > 0 {
            self.confirm_sent(sender_id, sender_name, title, body, report.delivered)
                .await;
        }

        Ok(BroadcastOutcome::Sent(report))
    }

    async fn ensure_counter(&self, user_id: Uuid) {
        if let Err(e) = self.counters.ensure(user_id).await {
            error!("Failed to initialize unread counter for {}: {}", user_id, e);
        }
    }

    async fn deliver_to(
        &self,
        recipient: &Recipient,
        payload: &NotificationPayload,
    ) -> DeliveryOutcome {
        let badge = match self.counters.get(recipient.user_id).await {
            Ok(Some(counter)) => counter.unread_count + 1,
            Ok(None) => 1,
            Err(e) => {
                error!(
                    "Failed to read unread counter for {}: {}",
                    recipient.user_id, e
                );
                1
            }
        };

        let payload = payload.with_badge(badge);
        let status = self
            .dispatcher
            .deliver(recipient.user_id, &recipient.channel, &payload)
            .await;

        if status == DeliveryStatus::Delivered {
            if let Err(e) = self.counters.increment(recipient.user_id, 1).await {
                error!(
                    "Failed to increment unread counter for {}: {}",
                    recipient.user_id, e
                );
            }
            self.inbox
                .push(recipient.user_id, InboxEntry::received(&payload));
        }

        DeliveryOutcome {
            channel: recipient.channel.kind(),
            status,
        }
    }

    async fn confirm_sent(
        &self,
        sender_id: Uuid,
        sender_name: &str,
        title: &str,
        body: &str,
        delivered: usize,
    ) {
        self.inbox
            .push(sender_id, InboxEntry::sent(sender_name, title, body));

        let event = SessionEvent::Confirmation {
            title: "Message Sent".to_string(),
            body: format!(
                "Your message \"{}\" has been sent to {} users",
                title, delivered
            ),
            delivered,
        };
        if let Err(e) = self.sessions.publish(sender_id, &event).await {
            warn!("Failed to send confirmation to {}: {}", sender_id, e);
        }
    }

    /// Current counter, zero if the user has none or the store is unreachable.
    pub async fn unread_count(&self, user_id: Uuid) -> UnreadCounter {
        match self.counters.get(user_id).await {
            Ok(Some(counter)) => counter,
            Ok(None) => UnreadCounter::empty(user_id),
            Err(e) => {
                error!("Failed to read unread counter for {}: {}", user_id, e);
                UnreadCounter::empty(user_id)
            }
        }
    }

    /// Entries buffered for this session, newest first.
    pub fn open_inbox(&self, user_id: Uuid) -> Vec<InboxEntry> {
        self.inbox.entries(user_id)
    }

    /// Mark everything as seen: the counter goes to zero and the device badge
    /// is cleared.
    pub async fn close_inbox(&self, user_id: Uuid) {
        if let Err(e) = self.counters.reset(user_id).await {
            error!("Failed to reset unread counter for {}: {}", user_id, e);
        }

        match self.tokens.get(user_id).await {
            Ok(Some(token)) => {
                if let Some(channel) = token.channel() {
                    self.dispatcher.set_badge(user_id, &channel, 0).await;
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to read token for {}: {}", user_id, e),
        }
    }

    pub fn clear_inbox(&self, user_id: Uuid) {
        self.inbox.clear(user_id);
    }

    /// End the user's session: the inbox is dropped and every live
    /// subscription is told to shut down.
    pub async fn sign_out(&self, user_id: Uuid) {
        self.inbox.clear(user_id);
        match self.sessions.publish(user_id, &SessionEvent::SignedOut).await {
            Ok(sessions) => info!("Signed out {} live session(s) of {}", sessions, user_id),
            Err(e) => warn!("Failed to notify sessions of {} about sign-out: {}", user_id, e),
        }
    }

    pub async fn subscribe_unread(
        &self,
        user_id: Uuid,
    ) -> Result<Subscription<UnreadCounter>, StoreError> {
        self.counters.subscribe(user_id).await
    }

    pub async fn subscribe_events(
        &self,
        user_id: Uuid,
    ) -> Result<Subscription<SessionEvent>, StoreError> {
        self.sessions.subscribe(user_id).await
    }
}
