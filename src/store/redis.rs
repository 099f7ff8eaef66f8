use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{CounterStore, SessionBus, StoreError, Subscription, SUBSCRIPTION_BUFFER};
use crate::notification::model::{SessionEvent, UnreadCounter};

// Redis key prefixes
pub const UNREAD_KEY_PREFIX: &str = "unread";
pub const UNREAD_CHANNEL_PREFIX: &str = "unread:updates";
pub const SESSION_CHANNEL_PREFIX: &str = "notifications:user";

const FIELD_UNREAD_COUNT: &str = "unread_count";
const FIELD_LAST_UPDATED: &str = "last_updated";

pub fn unread_key(user_id: &Uuid) -> String {
    format!("{}:{}", UNREAD_KEY_PREFIX, user_id)
}

pub fn unread_channel(user_id: &Uuid) -> String {
    format!("{}:{}", UNREAD_CHANNEL_PREFIX, user_id)
}

pub fn session_channel(user_id: &Uuid) -> String {
    format!("{}:{}", SESSION_CHANNEL_PREFIX, user_id)
}

/// Build a counter from the fields of its hash. An empty hash means the
/// counter does not exist.
fn counter_from_fields(
    user_id: Uuid,
    fields: &HashMap<String, String>,
) -> Result<Option<UnreadCounter>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let unread_count = match fields.get(FIELD_UNREAD_COUNT) {
        Some(value) => value.parse::<i64>().map_err(|e| {
            StoreError::Malformed(format!("unread_count for {}: {}", user_id, e))
        })?,
        None => 0,
    };

    let last_updated = match fields.get(FIELD_LAST_UPDATED) {
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map_err(|e| StoreError::Malformed(format!("last_updated for {}: {}", user_id, e)))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    Ok(Some(UnreadCounter {
        user_id,
        unread_count: unread_count.max(0),
        last_updated,
    }))
}

/// Subscribe to a pub/sub channel carrying JSON documents. The subscription is
/// active before this returns, so nothing published afterwards is missed.
async fn subscribe_json<T>(client: &Client, channel: String) -> Result<Subscription<T>, StoreError>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(&channel).await?;
    info!("Subscribed to Redis channel: {}", channel);

    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let task = tokio::spawn(async move {
        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to get message payload on {}: {}", channel, e);
                    continue;
                }
            };

            let value: T = match serde_json::from_str(&payload) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Discarding malformed message on {}: {}", channel, e);
                    continue;
                }
            };

            if tx.send(value).await.is_err() {
                break;
            }
        }

        info!("Released Redis channel: {}", channel);
    });

    Ok(Subscription::new(rx, task))
}

/// Unread counters kept in one Redis hash per user.
#[derive(Debug, Clone)]
pub struct RedisCounterStore {
    client: Client,
}

impl RedisCounterStore {
    pub fn new(client: Client) -> Self {
        // Connection validation will happen on first use
        Self { client }
    }

    async fn publish_counter(&self, counter: &UnreadCounter) -> Result<(), StoreError> {
        let json = serde_json::to_string(counter)?;
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = connection
            .publish(unread_channel(&counter.user_id), json)
            .await?;
        Ok(())
    }

    async fn read(&self, user_id: Uuid) -> Result<Option<UnreadCounter>, StoreError> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let fields: HashMap<String, String> = connection.hgetall(unread_key(&user_id)).await?;
        counter_from_fields(user_id, &fields)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UnreadCounter>, StoreError> {
        self.read(user_id).await
    }

    async fn ensure(&self, user_id: Uuid) -> Result<UnreadCounter, StoreError> {
        let key = unread_key(&user_id);
        let now = Utc::now().to_rfc3339();
        let mut connection = self.client.get_multiplexed_async_connection().await?;

        let (created, _, fields): (bool, bool, HashMap<String, String>) = redis::pipe()
            .atomic()
            .hset_nx(&key, FIELD_UNREAD_COUNT, 0)
            .hset_nx(&key, FIELD_LAST_UPDATED, &now)
            .hgetall(&key)
            .query_async(&mut connection)
            .await?;

        let counter = counter_from_fields(user_id, &fields)?
            .unwrap_or_else(|| UnreadCounter::empty(user_id));

        if created {
            info!("Created unread counter for user {}", user_id);
            self.publish_counter(&counter).await?;
        }

        Ok(counter)
    }

    async fn increment(&self, user_id: Uuid, delta: u32) -> Result<UnreadCounter, StoreError> {
        let key = unread_key(&user_id);
        let now = Utc::now();
        let mut connection = self.client.get_multiplexed_async_connection().await?;

        let (unread_count,): (i64,) = redis::pipe()
            .atomic()
            .hincr(&key, FIELD_UNREAD_COUNT, i64::from(delta))
            .hset(&key, FIELD_LAST_UPDATED, now.to_rfc3339())
            .ignore()
            .query_async(&mut connection)
            .await?;

        let counter = UnreadCounter {
            user_id,
            unread_count,
            last_updated: now,
        };

        info!(
            "Incremented unread counter for user {} to {}",
            user_id, unread_count
        );
        self.publish_counter(&counter).await?;
        Ok(counter)
    }

    async fn reset(&self, user_id: Uuid) -> Result<UnreadCounter, StoreError> {
        let key = unread_key(&user_id);
        let now = Utc::now();
        let mut connection = self.client.get_multiplexed_async_connection().await?;

        let _: () = redis::pipe()
            .atomic()
            .hset(&key, FIELD_UNREAD_COUNT, 0)
            .ignore()
            .hset(&key, FIELD_LAST_UPDATED, now.to_rfc3339())
            .ignore()
            .query_async(&mut connection)
            .await?;

        let counter = UnreadCounter {
            user_id,
            unread_count: 0,
            last_updated: now,
        };

        info!("Reset unread counter for user {}", user_id);
        self.publish_counter(&counter).await?;
        Ok(counter)
    }

    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription<UnreadCounter>, StoreError> {
        // Subscribe before reading so an update between the two is not lost
        let mut pending =
            subscribe_json::<UnreadCounter>(&self.client, unread_channel(&user_id)).await?;
        let current = self
            .read(user_id)
            .await?
            .unwrap_or_else(|| UnreadCounter::empty(user_id));

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(async move {
            if tx.send(current).await.is_err() {
                return;
            }
            while let Some(counter) = pending.next().await {
                if tx.send(counter).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}

/// Session events carried over Redis pub/sub so every instance can reach a
/// user's WebSocket.
#[derive(Debug, Clone)]
pub struct RedisSessionBus {
    client: Client,
}

impl RedisSessionBus {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionBus for RedisSessionBus {
    async fn publish(&self, user_id: Uuid, event: &SessionEvent) -> Result<usize, StoreError> {
        let json = serde_json::to_string(event)?;
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let receivers: i64 = connection.publish(session_channel(&user_id), json).await?;
        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription<SessionEvent>, StoreError> {
        subscribe_json(&self.client, session_channel(&user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_and_channel_format() {
        let user_id = Uuid::parse_str("123e4567-e89b-12d3-a456-426614174000").unwrap();
        assert_eq!(
            unread_key(&user_id),
            "unread:123e4567-e89b-12d3-a456-426614174000"
        );
        assert_eq!(
            unread_channel(&user_id),
            "unread:updates:123e4567-e89b-12d3-a456-426614174000"
        );
        assert_eq!(
            session_channel(&user_id),
            "notifications:user:123e4567-e89b-12d3-a456-426614174000"
        );
    }

    #[test]
    fn test_counter_from_fields() {
        let user_id = Uuid::new_v4();
        assert!(counter_from_fields(user_id, &HashMap::new())
            .unwrap()
            .is_none());

        let mut fields = HashMap::new();
        fields.insert("unread_count".to_string(), "5".to_string());
        fields.insert(
            "last_updated".to_string(),
            "2024-05-01T10:00:00+00:00".to_string(),
        );
        let counter = counter_from_fields(user_id, &fields).unwrap().unwrap();
        assert_eq!(counter.unread_count, 5);
        assert_eq!(counter.last_updated.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_counter_from_fields_rejects_garbage() {
        let mut fields = HashMap::new();
        fields.insert("unread_count".to_string(), "many".to_string());
        let result = counter_from_fields(Uuid::new_v4(), &fields);
        assert!(matches!(result, Err(StoreError::Malformed(_))));
    }
}
