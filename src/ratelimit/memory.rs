//! In-process counter store.
//!
//! Holds counters for a single instance only. Useful for development,
//! single-node deployments, and tests; a fleet must share a `RedisStore`.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::store::{CounterStore, StoreError};

/// A single counter record.
#[derive(Debug, Clone, Copy, Default)]
struct CounterRecord {
    count: u64,
    expires_at: Option<Instant>,
}

impl CounterRecord {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Deadline `ttl` from `now`; a TTL past the clock's range never expires.
fn expiry(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

/// Counter store backed by a concurrent map.
///
/// Each operation runs under the shard lock of its key, which makes the
/// increment and the create-with-expiry step atomic per key.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<String, CounterRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the record for `key`, resetting it first if it has expired.
    fn bump(&self, key: &str, ttl: Option<Duration>) -> u64 {
        let now = Instant::now();
        let mut record = self.records.entry(key.to_string()).or_default();

        if record.is_expired(now) {
            *record = CounterRecord::default();
        }
        record.count += 1;

        if record.count == 1 {
            if let Some(ttl) = ttl {
                record.expires_at = expiry(now, ttl);
            }
        }

        trace!(key = %key, count = record.count, "Incremented in-memory counter");
        record.count
    }

    /// Remove every expired record and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }

    /// Number of records currently held, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current count for `key`, treating expired records as absent.
    pub fn current_count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.count)
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.bump(key, None))
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        if let Some(mut record) = self.records.get_mut(key) {
            if !record.is_expired(now) {
                record.expires_at = expiry(now, ttl);
            }
        }
        Ok(())
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        Ok(self.bump(key, Some(ttl)))
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .and_then(|record| record.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}
