pub mod memory;
pub mod postgres;
pub mod redis;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::notification::model::{SessionEvent, UnreadCounter, UserToken};

// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    RedisError(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Malformed document: {0}")]
    Malformed(String),
}

/// Push addresses keyed by user.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Create or replace the user's token. Last write wins.
    async fn upsert(&self, token: &UserToken) -> Result<(), StoreError>;

    async fn get(&self, user_id: Uuid) -> Result<Option<UserToken>, StoreError>;

    async fn list_all(&self) -> Result<Vec<UserToken>, StoreError>;
}

/// Unread counters keyed by user. Every write is published to the user's
/// subscribers.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<UnreadCounter>, StoreError>;

    /// Create the counter with a count of zero if it does not exist yet.
    /// Safe to call concurrently.
    async fn ensure(&self, user_id: Uuid) -> Result<UnreadCounter, StoreError>;

    /// Atomically add `delta` to the counter, creating it if needed.
    async fn increment(&self, user_id: Uuid, delta: u32) -> Result<UnreadCounter, StoreError>;

    /// Set the counter to zero.
    async fn reset(&self, user_id: Uuid) -> Result<UnreadCounter, StoreError>;

    /// Live updates of one counter. The current value comes first, zero when
    /// the user has no counter yet.
    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription<UnreadCounter>, StoreError>;
}

/// Fan-in point for everything pushed to a user's live sessions.
#[async_trait]
pub trait SessionBus: Send + Sync {
    /// Returns how many live sessions received the event.
    async fn publish(&self, user_id: Uuid, event: &SessionEvent) -> Result<usize, StoreError>;

    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription<SessionEvent>, StoreError>;
}

/// A live listener. The listener is released when the subscription is dropped.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next update, or `None` once the underlying listener has gone away.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// Buffer between a listener task and its subscription
pub(crate) const SUBSCRIPTION_BUFFER: usize = 32;
