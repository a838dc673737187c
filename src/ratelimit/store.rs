//! Counter store trait for abstracting in-process and distributed backends.

use async_trait::async_trait;
use std::sync::Arc;

use super::counter::Counter;
use crate::error::Result;

/// Trait for hit counter backends.
///
/// This trait abstracts over the in-process [`MemoryStore`](super::MemoryStore)
/// and the Redis-backed [`RedisStore`](super::RedisStore) so the rate limit
/// middleware can work with either.
///
/// Both backends count in fixed windows: the first increment for a key starts
/// its window and the count restarts at 1 only once that window has elapsed.
/// A client can therefore get up to twice the limit through across a window
/// boundary.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the hit count for `key` and report the time left
    /// in its window.
    async fn increment(&self, key: &str) -> Result<Counter>;
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    async fn increment(&self, key: &str) -> Result<Counter> {
        (**self).increment(key).await
    }
}
