//! Client address resolution for inbound requests.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// Per-request inputs for identifying the client.
///
/// Built from the request itself and passed explicitly to whatever needs it.
#[derive(Debug, Clone, Copy)]
pub struct ClientContext<'a> {
    pub headers: &'a HeaderMap,
    pub peer: Option<SocketAddr>,
    pub trust_proxy_headers: bool,
}

impl ClientContext<'_> {
    /// Resolve the client address.
    ///
    /// With proxy headers trusted, `X-Real-IP` wins, then the first
    /// parseable entry of `X-Forwarded-For`; the peer address of the
    /// connection is the fallback. Header values that are not IP addresses
    /// are ignored rather than used as identities.
    pub fn client_ip(&self) -> Option<IpAddr> {
        if self.trust_proxy_headers {
            if let Some(ip) = header_ip(self.headers, "x-real-ip") {
                return Some(ip);
            }
            if let Some(ip) = forwarded_for(self.headers) {
                return Some(ip);
            }
        }
        self.peer.map(|addr| addr.ip())
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())?
        .split(',')
        .map(str::trim)
        .find(|entry| !entry.is_empty())?
        .parse()
        .ok()
}
