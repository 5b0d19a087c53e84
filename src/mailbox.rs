//! Keyed single-slot mailbox
//!
//! Every key owns a channel with room for one value. Producers never block:
//! a value offered to an occupied slot is dropped. Consumers wait for the
//! next value of one key with a timeout.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

struct Slot<V> {
    tx: mpsc::Sender<V>,
    rx: AsyncMutex<mpsc::Receiver<V>>,
}

pub struct KeyedMailbox<K, V> {
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> KeyedMailbox<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(key.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(1);
                Arc::new(Slot {
                    tx,
                    rx: AsyncMutex::new(rx),
                })
            })
            .clone()
    }

    /// Offer a value. Returns false if the slot was already occupied.
    pub fn put(&self, key: &K, value: V) -> bool {
        self.slot(key).tx.try_send(value).is_ok()
    }

    /// Drop whatever is waiting in the slot
    pub async fn clear(&self, key: &K) {
        let slot = self.slot(key);
        let mut rx = slot.rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Wait for the next value of `key`, or `None` after `timeout`
    pub async fn recv_timeout(&self, key: &K, timeout: Duration) -> Option<V> {
        let slot = self.slot(key);
        tokio::time::timeout(timeout, async {
            let mut rx = slot.rx.lock().await;
            rx.recv().await
        })
        .await
        .ok()
        .flatten()
    }
}

impl<K, V> Default for KeyedMailbox<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
