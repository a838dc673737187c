//! Tollgate - Request Governance Middleware
//!
//! This crate provides two tower layers for axum services. [`RateLimitLayer`]
//! counts requests per key in a fixed window, backed by process memory or a
//! shared Redis instance. [`ErrorSchemeLayer`] gives every request an error
//! channel, renders reported errors and recovers from handler panics.

pub mod config;
pub mod error;
pub mod errorscheme;
pub mod ratelimit;

pub use config::TollgateConfig;
pub use error::{Result, TollgateError};
pub use errorscheme::{AppError, ErrorChannel, ErrorSchemeLayer};
pub use ratelimit::{CounterStore, KeyPolicy, MemoryStore, RateLimitLayer, RedisStore};
