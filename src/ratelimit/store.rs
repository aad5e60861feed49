//! Counter store trait for abstracting the shared store and local implementations.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while talking to a counter store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The call did not complete within the configured bound.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    /// Connection, protocol or server-side failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Trait for counter store implementations.
///
/// Every record is an integer count keyed by string with an optional expiry.
/// Implementations must make `increment` and `increment_with_expiry` atomic
/// with respect to every other caller sharing the store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` by one and return the new value.
    ///
    /// An absent or expired record starts again at 1 with no expiry.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Set the expiry of an existing record to `ttl` from now.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Increment and, if the record was just created, give it `ttl` in the
    /// same atomic step.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Remaining lifetime of the record, `None` if absent or without expiry.
    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}
