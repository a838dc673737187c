//! Rate limit counter implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of a key's counter as returned by a [`CounterStore`](super::CounterStore).
///
/// Both fields come from the same counter entry at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Increments observed for the key in its current window
    pub hits: u64,
    /// Whole seconds until the key's window elapses
    pub reset_in: u64,
}

impl Counter {
    /// Create a counter snapshot.
    pub fn new(hits: u64, reset_in: u64) -> Self {
        Self { hits, reset_in }
    }

    /// Remaining quota for `limit`, never below zero.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.hits)
    }

    /// Whether this counter is over `limit`. The limit itself is still allowed.
    pub fn exceeds(&self, limit: u64) -> bool {
        self.hits > limit
    }
}

/// A single key's entry in the in-memory store.
///
/// The hit count is atomic so increments to an existing key never need the
/// store's map lock. The window start never changes after creation; an
/// expired entry is replaced, not reset.
#[derive(Debug)]
pub struct CounterEntry {
    /// Current count of hits in this window
    hits: AtomicU64,
    /// When the window for this entry started
    created_at: Instant,
    /// Length of the window
    window: Duration,
}

impl CounterEntry {
    /// Create an entry whose window starts now.
    pub fn new(window: Duration) -> Self {
        Self {
            hits: AtomicU64::new(0),
            created_at: Instant::now(),
            window,
        }
    }

    /// Record one hit and return the post-increment snapshot.
    pub fn increment(&self) -> Counter {
        let hits = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
        Counter::new(hits, self.duration_until_reset().as_secs())
    }

    /// Get the current count.
    pub fn current_count(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Get the duration until the window for this entry elapses.
    pub fn duration_until_reset(&self) -> Duration {
        let window_end = self.created_at + self.window;
        window_end.saturating_duration_since(Instant::now())
    }

    /// Whether the window for this entry has elapsed.
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.window
    }
}
