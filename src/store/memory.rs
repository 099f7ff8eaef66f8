//! In-process backends. Used when no Redis URL is configured, which limits
//! the service to a single instance.

use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::{CounterStore, SessionBus, StoreError, Subscription, SUBSCRIPTION_BUFFER};
use crate::notification::model::{SessionEvent, UnreadCounter};

const WATCHER_CAPACITY: usize = 64;

/// Per-user broadcast senders, created on first use.
#[derive(Debug)]
struct Watchers<T> {
    senders: Mutex<HashMap<Uuid, broadcast::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Watchers<T> {
    fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
        }
    }

    fn watch(&self, user_id: Uuid) -> broadcast::Receiver<T> {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(WATCHER_CAPACITY).0)
            .subscribe()
    }

    fn notify(&self, user_id: Uuid, value: T) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = senders.get(&user_id) else {
            return 0;
        };

        match sender.send(value) {
            Ok(receivers) => receivers,
            Err(_) => {
                // Everyone went away
                senders.remove(&user_id);
                0
            }
        }
    }
}

fn forward<T: Clone + Send + 'static>(
    initial: Option<T>,
    mut rx: broadcast::Receiver<T>,
) -> Subscription<T> {
    let (tx, out) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let task = tokio::spawn(async move {
        if let Some(value) = initial {
            if tx.send(value).await.is_err() {
                return;
            }
        }

        loop {
            match rx.recv().await {
                Ok(value) => {
                    if tx.send(value).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Subscription::new(out, task)
}

#[derive(Debug, Clone)]
pub struct MemoryCounterStore {
    counters: Arc<Mutex<HashMap<Uuid, UnreadCounter>>>,
    watchers: Arc<Watchers<UnreadCounter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Mutex::new(HashMap::new())),
            watchers: Arc::new(Watchers::new()),
        }
    }

    fn write<F>(&self, user_id: Uuid, update: F) -> UnreadCounter
    where
        F: FnOnce(&mut UnreadCounter),
    {
        let counter = {
            let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
            let counter = counters
                .entry(user_id)
                .or_insert_with(|| UnreadCounter::empty(user_id));
            update(counter);
            counter.last_updated = Utc::now();
            counter.clone()
        };

        self.watchers.notify(user_id, counter.clone());
        counter
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UnreadCounter>, StoreError> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(counters.get(&user_id).cloned())
    }

    async fn ensure(&self, user_id: Uuid) -> Result<UnreadCounter, StoreError> {
        let (counter, created) = {
            let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
            let created = !counters.contains_key(&user_id);
            let counter = counters
                .entry(user_id)
                .or_insert_with(|| UnreadCounter::empty(user_id))
                .clone();
            (counter, created)
        };

        if created {
            self.watchers.notify(user_id, counter.clone());
        }
        Ok(counter)
    }

    async fn increment(&self, user_id: Uuid, delta: u32) -> Result<UnreadCounter, StoreError> {
        Ok(self.write(user_id, |counter| {
            counter.unread_count += i64::from(delta);
        }))
    }

    async fn reset(&self, user_id: Uuid) -> Result<UnreadCounter, StoreError> {
        Ok(self.write(user_id, |counter| counter.unread_count = 0))
    }

    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription<UnreadCounter>, StoreError> {
        let rx = self.watchers.watch(user_id);
        let current = self
            .get(user_id)
            .await?
            .unwrap_or_else(|| UnreadCounter::empty(user_id));
        Ok(forward(Some(current), rx))
    }
}

#[derive(Debug, Clone)]
pub struct MemorySessionBus {
    watchers: Arc<Watchers<SessionEvent>>,
}

impl MemorySessionBus {
    pub fn new() -> Self {
        Self {
            watchers: Arc::new(Watchers::new()),
        }
    }
}

impl Default for MemorySessionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionBus for MemorySessionBus {
    async fn publish(&self, user_id: Uuid, event: &SessionEvent) -> Result<usize, StoreError> {
        Ok(self.watchers.notify(user_id, event.clone()))
    }

    async fn subscribe(&self, user_id: Uuid) -> Result<Subscription<SessionEvent>, StoreError> {
        Ok(forward(None, self.watchers.watch(user_id)))
    }
}

#[cfg(test)]
pub use token_store::MemoryTokenStore;

#[cfg(test)]
mod token_store {
    use super::*;
    use crate::notification::model::UserToken;
    use crate::store::TokenStore;

    #[derive(Debug, Clone, Default)]
    pub struct MemoryTokenStore {
        tokens: Arc<Mutex<HashMap<Uuid, UserToken>>>,
    }

    impl MemoryTokenStore {
        pub fn with_tokens(tokens: Vec<UserToken>) -> Self {
            let store = Self::default();
            {
                let mut map = store.tokens.lock().unwrap();
                for token in tokens {
                    map.insert(token.user_id, token);
                }
            }
            store
        }
    }

    #[async_trait]
    impl TokenStore for MemoryTokenStore {
        async fn upsert(&self, token: &UserToken) -> Result<(), StoreError> {
            self.tokens
                .lock()
                .unwrap()
                .insert(token.user_id, token.clone());
            Ok(())
        }

        async fn get(&self, user_id: Uuid) -> Result<Option<UserToken>, StoreError> {
            Ok(self.tokens.lock().unwrap().get(&user_id).cloned())
        }

        async fn list_all(&self) -> Result<Vec<UserToken>, StoreError> {
            Ok(self.tokens.lock().unwrap().values().cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = MemoryCounterStore::new();
        let user = Uuid::new_v4();

        assert!(store.get(user).await.unwrap().is_none());
        assert_eq!(store.ensure(user).await.unwrap().unread_count, 0);

        store.increment(user, 3).await.unwrap();
        // A second ensure leaves the existing count alone
        assert_eq!(store.ensure(user).await.unwrap().unread_count, 3);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = MemoryCounterStore::new();
        let user = Uuid::new_v4();
        store.ensure(user).await.unwrap();

        let increments = (0..50).map(|_| store.increment(user, 1));
        futures::future::join_all(increments).await;

        assert_eq!(store.get(user).await.unwrap().unwrap().unread_count, 50);
    }

    #[tokio::test]
    async fn test_reset_sets_zero() {
        let store = MemoryCounterStore::new();
        let user = Uuid::new_v4();

        store.increment(user, 7).await.unwrap();
        let counter = store.reset(user).await.unwrap();
        assert_eq!(counter.unread_count, 0);
    }

    #[tokio::test]
    async fn test_subscription_receives_current_then_updates() {
        let store = MemoryCounterStore::new();
        let user = Uuid::new_v4();
        store.increment(user, 2).await.unwrap();

        let mut subscription = store.subscribe(user).await.unwrap();
        let first = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.unread_count, 2);

        store.increment(user, 1).await.unwrap();
        let second = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.unread_count, 3);
    }

    #[tokio::test]
    async fn test_subscription_starts_at_zero_without_counter() {
        let store = MemoryCounterStore::new();
        let user = Uuid::new_v4();

        let mut subscription = store.subscribe(user).await.unwrap();
        let first = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.unread_count, 0);
        assert!(store.get(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_releases_listener() {
        let bus = MemorySessionBus::new();
        let user = Uuid::new_v4();

        let subscription = bus.subscribe(user).await.unwrap();
        drop(subscription);
        // Give the aborted forwarder a chance to drop its receiver
        tokio::time::sleep(Duration::from_millis(20)).await;

        let receivers = bus.publish(user, &SessionEvent::SignedOut).await.unwrap();
        assert_eq!(receivers, 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_session() {
        let bus = MemorySessionBus::new();
        let user = Uuid::new_v4();

        let mut first = bus.subscribe(user).await.unwrap();
        let mut second = bus.subscribe(user).await.unwrap();

        let receivers = bus.publish(user, &SessionEvent::SignedOut).await.unwrap();
        assert_eq!(receivers, 2);
        assert_eq!(first.next().await, Some(SessionEvent::SignedOut));
        assert_eq!(second.next().await, Some(SessionEvent::SignedOut));

        assert_eq!(
            bus.publish(Uuid::new_v4(), &SessionEvent::SignedOut)
                .await
                .unwrap(),
            0
        );
    }
}
