use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};
use uuid::Uuid;

use super::model::InboxEntry;

pub const DEFAULT_INBOX_CAPACITY: usize = 100;

/// Received and sent messages for the current session of each user, newest
/// first. Nothing here survives a restart.
#[derive(Debug, Clone)]
pub struct Inbox {
    entries: Arc<Mutex<HashMap<Uuid, VecDeque<InboxEntry>>>>,
    capacity: usize,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, user_id: Uuid, entry: InboxEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let list = entries.entry(user_id).or_default();
        list.push_front(entry);
        list.truncate(self.capacity);
    }

    pub fn entries(&self, user_id: Uuid) -> Vec<InboxEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&user_id)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, user_id: Uuid) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&user_id);
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new(DEFAULT_INBOX_CAPACITY)
    }
}
