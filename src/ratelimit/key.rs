//! Rate limit key generation.

use std::net::IpAddr;

use super::limiter::RateLimitError;

/// Namespace prefix applied to every key unless configured otherwise.
pub const DEFAULT_KEY_PREFIX: &str = "req_limit_";

/// Separator between the resource and the client address.
///
/// The client part is always a formatted `IpAddr`, which never contains this
/// character, so the last occurrence in a key marks the boundary.
const CLIENT_SEPARATOR: char = '_';

/// A key identifying one (resource, client) pair in the counter store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the key back into its resource and client parts.
    ///
    /// Returns `None` if the key was not built with `prefix`.
    pub fn split<'a>(&'a self, prefix: &str) -> Option<(&'a str, IpAddr)> {
        let rest = self.0.strip_prefix(prefix)?;
        let (resource, client) = rest.rsplit_once(CLIENT_SEPARATOR)?;
        let client = client.parse().ok()?;
        Some((resource, client))
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds keys under one namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key for `client` requesting `resource`.
    ///
    /// A missing client address is an error rather than a shared key, so that
    /// unidentifiable requests never pool into one counter.
    pub fn build(
        &self,
        client: Option<IpAddr>,
        resource: &str,
    ) -> Result<RateLimitKey, RateLimitError> {
        let client = client.ok_or(RateLimitError::MissingIdentity)?;
        Ok(RateLimitKey(format!(
            "{}{}{}{}",
            self.prefix, resource, CLIENT_SEPARATOR, client
        )))
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}
