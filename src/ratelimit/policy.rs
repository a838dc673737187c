//! Rate limit key policies.
//!
//! A policy maps a request to the key its hits are counted under. The key's
//! granularity decides what is being limited: one constant key limits the
//! whole service, a per-IP key limits each client, and so on.

use axum::extract::Request;
use axum::http::header::HeaderName;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::client_ip::ClientIpResolver;
use crate::error::{Result, TollgateError};

/// Maps a request to the key its hits are counted under.
pub trait KeyPolicy: Send + Sync {
    /// Compute the rate limit key for `req`.
    fn key(&self, req: &Request) -> String;
}

impl<F> KeyPolicy for F
where
    F: Fn(&Request) -> String + Send + Sync,
{
    fn key(&self, req: &Request) -> String {
        self(req)
    }
}

/// Hash raw key material into a fixed-length key.
pub fn hash_key(raw: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(raw.as_ref()))
}

/// Request attributes a [`CompositePolicy`] builds its key from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyComponents {
    /// Include the client IP
    #[serde(default)]
    pub ip: bool,
    /// Include the HTTP method
    #[serde(default)]
    pub method: bool,
    /// Include the request path
    #[serde(default)]
    pub path: bool,
    /// Include these header values, in order
    #[serde(default)]
    pub headers: Vec<String>,
}

impl KeyComponents {
    /// Components for a per-IP key.
    pub fn ip() -> Self {
        Self {
            ip: true,
            ..Default::default()
        }
    }

    /// Components for a per-path key.
    pub fn path() -> Self {
        Self {
            path: true,
            ..Default::default()
        }
    }

    /// Whether no component is selected.
    pub fn is_empty(&self) -> bool {
        !self.ip && !self.method && !self.path && self.headers.is_empty()
    }
}

/// A key policy that combines selected request attributes.
///
/// The raw key is the concatenation of IP, method, path and then each
/// non-empty header value in the configured order. If nothing selected is
/// present on the request, the client IP alone is used. The raw key is
/// hashed so every key has the same length.
#[derive(Debug, Clone)]
pub struct CompositePolicy {
    components: KeyComponents,
    headers: Vec<HeaderName>,
    client_ip: ClientIpResolver,
}

impl CompositePolicy {
    /// Create a policy from `components`.
    ///
    /// Fails if no component is selected or a header name is invalid.
    pub fn new(components: KeyComponents) -> Result<Self> {
        if components.is_empty() {
            return Err(TollgateError::Config(
                "rate limit key policy is empty; at least one component must be set".to_string(),
            ));
        }

        let headers = components
            .headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    TollgateError::Config(format!("invalid key header name {:?}: {}", name, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            components,
            headers,
            client_ip: ClientIpResolver::default(),
        })
    }

    /// A policy keyed on the client IP only.
    pub fn per_ip() -> Self {
        Self {
            components: KeyComponents::ip(),
            headers: Vec::new(),
            client_ip: ClientIpResolver::default(),
        }
    }

    /// A policy keyed on the request path only.
    pub fn per_path() -> Self {
        Self {
            components: KeyComponents::path(),
            headers: Vec::new(),
            client_ip: ClientIpResolver::default(),
        }
    }

    /// Use `resolver` to find the client IP.
    pub fn with_client_ip(mut self, resolver: ClientIpResolver) -> Self {
        self.client_ip = resolver;
        self
    }

    /// Build the key material for `req` before hashing.
    ///
    /// Header values are taken as raw bytes, so values that are not visible
    /// ASCII still tell clients apart.
    pub fn raw_key(&self, req: &Request) -> Vec<u8> {
        let mut raw = Vec::new();

        if self.components.ip {
            raw.extend_from_slice(self.client_ip.resolve(req).as_bytes());
        }

        if self.components.method {
            raw.extend_from_slice(req.method().as_str().as_bytes());
        }

        if self.components.path {
            raw.extend_from_slice(req.uri().path().as_bytes());
        }

        for header in &self.headers {
            if let Some(value) = req.headers().get(header) {
                raw.extend_from_slice(value.as_bytes());
            }
        }

        if raw.is_empty() {
            return self.client_ip.resolve(req).into_bytes();
        }

        raw
    }
}

impl KeyPolicy for CompositePolicy {
    fn key(&self, req: &Request) -> String {
        hash_key(&self.raw_key(req))
    }
}

/// A policy that puts every request under one key, limiting the service as a
/// whole.
#[derive(Debug, Clone)]
pub struct GlobalPolicy {
    key: String,
}

impl GlobalPolicy {
    /// Create the global policy.
    pub fn new() -> Self {
        Self {
            key: hash_key("hits"),
        }
    }
}

impl Default for GlobalPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyPolicy for GlobalPolicy {
    fn key(&self, _req: &Request) -> String {
        self.key.clone()
    }
}
