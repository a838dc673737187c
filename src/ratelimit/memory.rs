//! In-process counter store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::counter::{Counter, CounterEntry};
use super::store::CounterStore;
use crate::error::{Result, TollgateError};

type CounterMap = HashMap<String, Arc<CounterEntry>>;

/// A counter store that keeps per-key counters in process memory.
///
/// The map lock is only taken for writing when a key gets a new entry or an
/// entry is evicted. Increments on an existing entry take the read lock and
/// then update the entry's atomic count, so hot keys do not contend on the
/// map.
///
/// Each new entry schedules a one-shot eviction task that removes it once its
/// window has elapsed. Eviction only removes the entry it was scheduled for
/// and never touches a counter value.
pub struct MemoryStore {
    /// Counters indexed by rate limit key
    counters: Arc<RwLock<CounterMap>>,
    /// Window length applied to every key
    window: Duration,
}

impl MemoryStore {
    /// Create a new store where each key's counter lives for `window`.
    ///
    /// Fails on a window shorter than one millisecond, which would expire
    /// every counter as soon as it is created.
    pub fn new(window: Duration) -> Result<Self> {
        if window.as_millis() == 0 {
            return Err(TollgateError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
            window,
        })
    }

    /// Get the current counter value for a key.
    ///
    /// Returns `None` if the key has no live counter.
    pub fn get_counter_value(&self, key: &str) -> Option<u64> {
        let counters = self.counters.read();
        counters
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.current_count())
    }

    /// Get the number of counter entries currently held, including expired
    /// entries whose eviction has not run yet.
    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    /// Whether the store holds no counter entries.
    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty()
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counters.write().clear();
    }

    /// Find the live entry for `key`, creating one if needed.
    fn entry(&self, key: &str) -> Arc<CounterEntry> {
        {
            let counters = self.counters.read();
            if let Some(entry) = counters.get(key).filter(|entry| !entry.is_expired()) {
                return Arc::clone(entry);
            }
        }

        let mut counters = self.counters.write();

        // Another request may have created the entry while we waited for the lock
        if let Some(entry) = counters.get(key).filter(|entry| !entry.is_expired()) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(CounterEntry::new(self.window));
        counters.insert(key.to_string(), Arc::clone(&entry));
        drop(counters);

        debug!(
            key = %key,
            window = ?self.window,
            "Creating new rate limit counter"
        );

        self.schedule_eviction(key.to_string(), Arc::clone(&entry));
        entry
    }

    /// Remove `entry` from the map once its window has elapsed.
    fn schedule_eviction(&self, key: String, entry: Arc<CounterEntry>) {
        let counters = Arc::downgrade(&self.counters);
        let deadline = Instant::now() + self.window;

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            // The store is gone, nothing left to evict from
            let Some(counters) = counters.upgrade() else {
                return;
            };

            let mut counters = counters.write();
            let is_same_entry = counters
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &entry));

            if is_same_entry {
                counters.remove(&key);
                debug!(key = %key, "Evicted rate limit counter");
            }
        });
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str) -> Result<Counter> {
        let counter = self.entry(key).increment();

        trace!(
            key = %key,
            hits = counter.hits,
            reset_in = counter.reset_in,
            "Incremented rate limit counter"
        );

        Ok(counter)
    }
}
