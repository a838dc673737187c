//! Client IP resolution from proxy headers and the connection peer.

use axum::extract::{ConnectInfo, Request};
use axum::http::header::{HeaderName, FORWARDED};
use std::net::{IpAddr, SocketAddr};

use crate::error::{Result, TollgateError};

/// Proxy headers consulted by default, in priority order.
pub const DEFAULT_TRUSTED_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
    "true-client-ip",
];

/// Value used when neither a header nor the connection yields an address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolves the client IP for a request.
///
/// Trusted headers are tried in order. For `X-Forwarded-For` only the first
/// comma-separated entry is used. A port suffix is dropped and the value must
/// parse as an IP address, otherwise the next header is tried. When no header
/// yields an address the connection peer (`ConnectInfo<SocketAddr>`) is used.
#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    headers: Vec<HeaderName>,
}

impl Default for ClientIpResolver {
    fn default() -> Self {
        Self {
            headers: DEFAULT_TRUSTED_HEADERS
                .into_iter()
                .map(HeaderName::from_static)
                .collect(),
        }
    }
}

impl ClientIpResolver {
    /// Create a resolver that trusts `headers`, in the given order.
    pub fn new<I, S>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers = headers
            .into_iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_ref().as_bytes()).map_err(|e| {
                    TollgateError::Config(format!(
                        "invalid trusted header name {:?}: {}",
                        name.as_ref(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { headers })
    }

    /// A resolver that ignores proxy headers and only uses the peer address.
    pub fn peer_only() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    /// Resolve the client IP for `req` as a string.
    pub fn resolve(&self, req: &Request) -> String {
        self.resolve_ip(req)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    /// Resolve the client IP for `req`, if any source yields one.
    pub fn resolve_ip(&self, req: &Request) -> Option<IpAddr> {
        for header in &self.headers {
            let Some(value) = req.headers().get(header).and_then(|v| v.to_str().ok()) else {
                continue;
            };

            let candidate = if header.as_str() == "x-forwarded-for" {
                value.split(',').next().unwrap_or(value)
            } else if *header == FORWARDED {
                forwarded_for(value).unwrap_or(value)
            } else {
                value
            };

            if let Some(ip) = parse_ip(candidate.trim()) {
                return Some(ip);
            }
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }
}

/// Parse an address with or without a port suffix.
fn parse_ip(value: &str) -> Option<IpAddr> {
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Extract the first `for=` node from an RFC 7239 `Forwarded` value.
fn forwarded_for(value: &str) -> Option<&str> {
    let first = value.split(',').next()?;
    first.split(';').find_map(|pair| {
        let (name, node) = pair.trim().split_once('=')?;
        if name.eq_ignore_ascii_case("for") {
            let node = node.trim_matches('"');
            Some(
                node.strip_prefix('[')
                    .and_then(|bare| bare.strip_suffix(']'))
                    .unwrap_or(node),
            )
        } else {
            None
        }
    })
}
