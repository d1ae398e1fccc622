use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Key = (String, String);

/// Serializes work per (user, chapter) key. Entries are dropped once no guard
/// or waiter references them.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: &str, chapter_id: &str) -> KeyGuard<'_> {
        let key = (user_id.to_string(), chapter_id.to_string());
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let guard = slot.lock_owned().await;
        KeyGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, key: &Key) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(key);
            }
        }
    }
}

pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: Key,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // the owned guard holds a reference to the slot; release it first
        self.guard.take();
        self.owner.release(&self.key);
    }
}
