//! Counter store backed by Redis.
//!
//! Redis is the shared store for a fleet of instances: every instance
//! increments the same keys and Redis expiry ends each window.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::store::{CounterStore, StoreError};

/// INCR and, when the record is new or has lost its TTL, PEXPIRE in one step.
///
/// A record without a TTL can only be left behind by a crash between the two
/// calls of the non-atomic path; re-arming it here keeps such records from
/// living forever.
const INCREMENT_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counter store using a managed, auto-reconnecting Redis connection.
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to `url`, bounding the initial connection by `timeout` as well.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = bounded(timeout, ConnectionManager::new(client)).await?;

        info!(timeout_ms = timeout.as_millis() as u64, "Connected to Redis counter store");

        Ok(Self {
            conn,
            timeout,
            script: Script::new(INCREMENT_WITH_EXPIRY),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Run a Redis call, turning an elapsed bound into `StoreError::Timeout`.
async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

/// Convert a duration to whole milliseconds for PEXPIRE, clamped to `1..=i64::MAX`.
fn millis_arg(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, conn.incr(key, 1u64)).await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let applied: bool = bounded(self.timeout, conn.pexpire(key, millis_arg(ttl))).await?;
        if !applied {
            debug!(key = %key, "PEXPIRE found no record");
        }
        Ok(())
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.script.key(key);
        invocation.arg(millis_arg(ttl));
        bounded(self.timeout, invocation.invoke_async(&mut conn)).await
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms: i64 = bounded(self.timeout, conn.pttl(key)).await?;
        // -2: no such key, -1: no expiry
        if ttl_ms < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(ttl_ms as u64)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::policy::{RateLimitPolicy, MAX_WINDOW_MS};

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn unique_key(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("tripgate_test_{}_{}", name, nanos)
    }

    #[test]
    fn test_millis_arg_never_zero() {
        assert_eq!(millis_arg(Duration::from_micros(10)), 1);
        assert_eq!(millis_arg(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_millis_arg_saturates_instead_of_wrapping() {
        assert_eq!(millis_arg(Duration::MAX), i64::MAX);
        assert_eq!(millis_arg(Duration::from_millis(u64::MAX)), i64::MAX);

        let policy = RateLimitPolicy::from_millis(MAX_WINDOW_MS, 1).unwrap();
        assert_eq!(millis_arg(policy.window()), i64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let timeout = Duration::from_millis(250);
        let result: Result<u64, StoreError> =
            bounded(timeout, std::future::pending::<redis::RedisResult<u64>>()).await;

        assert!(matches!(result, Err(StoreError::Timeout(elapsed)) if elapsed == timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_passes_through_redis_errors() {
        let failed = async {
            Err::<u64, _>(redis::RedisError::from((
                redis::ErrorKind::ResponseError,
                "WRONGTYPE",
            )))
        };
        let result = bounded(Duration::from_millis(250), failed).await;

        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        // Port 1 is reserved and never has a Redis listening on it
        let result = RedisStore::connect("redis://127.0.0.1:1", Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_increment_and_expiry() {
        let store = RedisStore::connect(&redis_url(), Duration::from_secs(1)).await.unwrap();
        let key = unique_key("incr");

        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.time_to_live(&key).await.unwrap(), None);

        store.set_expiry(&key, Duration::from_millis(200)).await.unwrap();
        assert!(store.time_to_live(&key).await.unwrap().is_some());
        assert_eq!(store.increment(&key).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.increment(&key).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_script_sets_ttl_once() {
        let store = RedisStore::connect(&redis_url(), Duration::from_secs(1)).await.unwrap();
        let key = unique_key("script");
        let ttl = Duration::from_secs(10);

        assert_eq!(store.increment_with_expiry(&key, ttl).await.unwrap(), 1);
        let first = store.time_to_live(&key).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.increment_with_expiry(&key, ttl).await.unwrap(), 2);
        let second = store.time_to_live(&key).await.unwrap().unwrap();

        assert!(second < first, "TTL must not be refreshed by later increments");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_script_repairs_missing_ttl() {
        let store = RedisStore::connect(&redis_url(), Duration::from_secs(1)).await.unwrap();
        let key = unique_key("repair");

        // A record left without a TTL, as after a crash between INCR and PEXPIRE
        store.increment(&key).await.unwrap();
        assert_eq!(store.time_to_live(&key).await.unwrap(), None);

        assert_eq!(
            store.increment_with_expiry(&key, Duration::from_secs(5)).await.unwrap(),
            2
        );
        assert!(store.time_to_live(&key).await.unwrap().is_some());
    }
}
