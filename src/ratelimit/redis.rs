//! Redis-backed counter store.
//!
//! Counters live in Redis so every instance of a service shares one count
//! per key. Each increment is a single Lua script call, so the count and the
//! key's expiry are updated in one round trip and concurrent increments from
//! any number of instances are serialized by Redis.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::fmt;
use std::time::Duration;
use tracing::{info, trace, warn};

use super::counter::Counter;
use super::store::CounterStore;
use crate::error::{Result, TollgateError};

/// Increment `KEYS[1]` and make sure it expires `ARGV[1]` milliseconds after
/// its first hit. Returns `{hits, remaining_ttl_ms}`.
const INCREMENT_SCRIPT: &str = r#"
local hits = redis.call('INCR', KEYS[1])
if hits == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {hits, ttl}
"#;

/// Configuration for the Redis counter store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Window applied to every key
    pub window: Duration,
    /// Prefix prepended to every rate limit key
    pub key_prefix: String,
    /// Upper bound for a single increment round trip
    pub timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            key_prefix: "tollgate:".to_string(),
            timeout: Duration::from_millis(500),
        }
    }
}

/// A counter store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    script: Script,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis and verify the server answers.
    ///
    /// Fails if the URL is invalid or the server cannot be reached, so a
    /// misconfigured backend stops startup instead of failing every request.
    pub async fn connect(url: &str, config: RedisStoreConfig) -> Result<Self> {
        if config.window.as_millis() == 0 {
            return Err(TollgateError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }

        let client = Client::open(url)?;
        let mut connection = tokio::time::timeout(config.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| TollgateError::Timeout(config.timeout))??;

        let pong: String = tokio::time::timeout(
            config.timeout,
            redis::cmd("PING").query_async(&mut connection),
        )
        .await
        .map_err(|_| TollgateError::Timeout(config.timeout))??;

        info!(
            reply = %pong,
            key_prefix = %config.key_prefix,
            window = ?config.window,
            "Connected to Redis counter store"
        );

        Ok(Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
            config,
        })
    }

    /// Get the Redis key for a rate limit key.
    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

/// Convert a script reply into a counter snapshot.
fn counter_from_reply(hits: i64, ttl_ms: i64) -> Result<Counter> {
    let hits = u64::try_from(hits)
        .map_err(|_| TollgateError::Store(format!("invalid hit count in script reply: {}", hits)))?;
    let reset_in = u64::try_from(ttl_ms).unwrap_or(0) / 1000;
    Ok(Counter::new(hits, reset_in))
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<Counter> {
        let redis_key = self.redis_key(key);
        let window_ms = self.config.window.as_millis() as u64;
        let mut connection = self.connection.clone();

        let mut invocation = self.script.key(&redis_key);
        invocation.arg(window_ms);

        let reply: (i64, i64) = tokio::time::timeout(
            self.config.timeout,
            invocation.invoke_async(&mut connection),
        )
        .await
        .map_err(|_| {
            warn!(key = %redis_key, timeout = ?self.config.timeout, "Counter increment timed out");
            TollgateError::Timeout(self.config.timeout)
        })?
        .map_err(|e| {
            warn!(key = %redis_key, error = %e, "Counter increment script failed");
            TollgateError::Redis(e)
        })?;

        let counter = counter_from_reply(reply.0, reply.1)?;

        trace!(
            key = %redis_key,
            hits = counter.hits,
            reset_in = counter.reset_in,
            "Incremented distributed rate limit counter"
        );

        Ok(counter)
    }
}
