//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{KeyComponents, DEFAULT_TRUSTED_HEADERS};

/// Prefix for environment variable overrides, e.g. `TOLLGATE__RATE_LIMITING__LIMIT`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for a Tollgate-governed service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Error rendering configuration
    #[serde(default)]
    pub errors: ErrorSchemeConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Hits allowed per key per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Counter store backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Request attributes the key is built from
    #[serde(default = "KeyComponents::ip")]
    pub key: KeyComponents,

    /// Proxy headers trusted for the client IP, in priority order
    #[serde(default = "default_trusted_headers")]
    pub trusted_headers: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_secs: default_window_secs(),
            backend: BackendConfig::default(),
            key: KeyComponents::ip(),
            trusted_headers: default_trusted_headers(),
        }
    }
}

fn default_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_trusted_headers() -> Vec<String> {
    DEFAULT_TRUSTED_HEADERS.iter().map(|h| h.to_string()).collect()
}

impl RateLimitingConfig {
    /// Get the window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Check values that would make the limiter meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(TollgateError::Config(
                "rate_limiting.limit must be greater than zero".to_string(),
            ));
        }

        if self.window_secs == 0 {
            return Err(TollgateError::Config(
                "rate_limiting.window_secs must be greater than zero".to_string(),
            ));
        }

        if self.key.is_empty() {
            return Err(TollgateError::Config(
                "rate_limiting.key must enable at least one component".to_string(),
            ));
        }

        Ok(())
    }
}

/// Counter store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Counters kept in process memory
    #[default]
    Memory,

    /// Counters shared through Redis
    Redis {
        /// Redis connection URL
        url: String,

        /// Prefix for every counter key
        #[serde(default = "default_key_prefix")]
        key_prefix: String,

        /// Per-call timeout in milliseconds
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_key_prefix() -> String {
    "tollgate:".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

/// Error rendering configuration.
///
/// Developer mode is on when the environment variable `dev_mode_var` equals
/// `dev_mode_value`. Only then are internal causes included in error bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSchemeConfig {
    /// Environment variable checked for developer mode
    #[serde(default = "default_dev_mode_var")]
    pub dev_mode_var: String,

    /// Value of `dev_mode_var` that turns developer mode on
    #[serde(default = "default_dev_mode_value")]
    pub dev_mode_value: String,
}

impl Default for ErrorSchemeConfig {
    fn default() -> Self {
        Self {
            dev_mode_var: default_dev_mode_var(),
            dev_mode_value: default_dev_mode_value(),
        }
    }
}

fn default_dev_mode_var() -> String {
    "ENV".to_string()
}

fn default_dev_mode_value() -> String {
    "develop".to_string()
}

impl ErrorSchemeConfig {
    /// Read developer mode from the environment.
    pub fn dev_mode_enabled(&self) -> bool {
        std::env::var(&self.dev_mode_var).is_ok_and(|value| value == self.dev_mode_value)
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.rate_limiting.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overridden by `TOLLGATE__*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|raw| raw.try_deserialize())
            .map_err(|e| TollgateError::Config(format!("Failed to load configuration: {}", e)))?;

        config.rate_limiting.validate()?;
        Ok(config)
    }
}
