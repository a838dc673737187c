//! Rate limiting middleware and counter stores.

mod client_ip;
mod counter;
mod layer;
mod memory;
mod policy;
mod redis;
mod store;

pub use client_ip::{ClientIpResolver, DEFAULT_TRUSTED_HEADERS, UNKNOWN_CLIENT};
pub use counter::{Counter, CounterEntry};
pub use layer::{
    RateLimitLayer, RateLimitService, STORE_ERROR_MESSAGE, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use memory::MemoryStore;
pub use policy::{hash_key, CompositePolicy, GlobalPolicy, KeyComponents, KeyPolicy};
pub use self::redis::{RedisStore, RedisStoreConfig};
pub use store::CounterStore;
