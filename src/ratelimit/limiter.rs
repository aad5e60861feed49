//! Core rate limiter implementation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, trace};

use super::key::RateLimitKey;
use super::policy::RateLimitPolicy;
use super::store::{CounterStore, StoreError};

/// Errors surfaced to the caller of a protected operation.
#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    /// The client address could not be determined.
    #[error("client identity is unavailable for this request")]
    MissingIdentity,

    /// The request is over the configured threshold for its window.
    #[error("rate limit exceeded for {key}: {count} > {max_count}")]
    ThresholdExceeded {
        key: RateLimitKey,
        count: u64,
        max_count: u64,
    },

    /// The counter store failed while running in `FailureMode::Closed`.
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// What to do with a request when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request and log the failure.
    Open,
    /// Refuse the request with `RateLimitError::StoreUnavailable`.
    Closed,
}

/// How a new window receives its expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStrategy {
    /// Increment and set expiry in one atomic store call.
    #[default]
    Atomic,
    /// Increment, then set expiry when the count is 1. A crash between the
    /// two calls leaves a record without expiry.
    IncrThenExpire,
}

/// Outcome of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Within the threshold; `count` is the post-increment value.
    Admitted { count: u64 },
    /// Over the threshold.
    Rejected { count: u64, max_count: u64 },
    /// The store failed and `FailureMode::Open` let the request through.
    Degraded,
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Decision::Rejected { .. })
    }

    /// The post-increment count, if the store answered.
    pub fn count(&self) -> Option<u64> {
        match self {
            Decision::Admitted { count } | Decision::Rejected { count, .. } => Some(*count),
            Decision::Degraded => None,
        }
    }
}

/// Fixed-window rate limiter over a shared counter store.
///
/// Holds no counter state of its own; every instance sharing the store sees
/// the same counts.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    failure_mode: FailureMode,
    window_strategy: WindowStrategy,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("failure_mode", &self.failure_mode)
            .field("window_strategy", &self.window_strategy)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter. The failure mode has no default and must be chosen.
    pub fn new(store: Arc<dyn CounterStore>, failure_mode: FailureMode) -> Self {
        Self {
            store,
            failure_mode,
            window_strategy: WindowStrategy::default(),
        }
    }

    pub fn with_window_strategy(mut self, window_strategy: WindowStrategy) -> Self {
        self.window_strategy = window_strategy;
        self
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub fn window_strategy(&self) -> WindowStrategy {
        self.window_strategy
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Evaluate one request for `key` under `policy`.
    ///
    /// Counts the request, then compares the count with the threshold.
    /// Store failures become `Decision::Degraded` in open mode and
    /// `RateLimitError::StoreUnavailable` in closed mode.
    pub async fn evaluate(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
    ) -> Result<Decision, RateLimitError> {
        let count = match self.count(key, policy).await {
            Ok(count) => count,
            Err(err) => {
                error!(
                    key = %key,
                    error = %err,
                    failure_mode = ?self.failure_mode,
                    "Counter store failed during rate limit evaluation"
                );
                return match self.failure_mode {
                    FailureMode::Open => Ok(Decision::Degraded),
                    FailureMode::Closed => Err(RateLimitError::StoreUnavailable(err)),
                };
            }
        };

        trace!(key = %key, count = count, max_count = policy.max_count(), "Counted request");

        if policy.is_exceeded_by(count) {
            debug!(
                key = %key,
                count = count,
                max_count = policy.max_count(),
                window_ms = policy.window_millis(),
                "Count over threshold"
            );
            return Ok(Decision::Rejected {
                count,
                max_count: policy.max_count(),
            });
        }

        Ok(Decision::Admitted { count })
    }

    /// Like `evaluate`, but a rejection becomes `RateLimitError::ThresholdExceeded`.
    pub async fn check(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
    ) -> Result<Decision, RateLimitError> {
        match self.evaluate(key, policy).await? {
            Decision::Rejected { count, max_count } => Err(RateLimitError::ThresholdExceeded {
                key: key.clone(),
                count,
                max_count,
            }),
            decision => Ok(decision),
        }
    }

    async fn count(&self, key: &RateLimitKey, policy: &RateLimitPolicy) -> Result<u64, StoreError> {
        match self.window_strategy {
            WindowStrategy::Atomic => {
                self.store
                    .increment_with_expiry(key.as_str(), policy.window())
                    .await
            }
            WindowStrategy::IncrThenExpire => {
                let count = self.store.increment(key.as_str()).await?;
                if count == 1 {
                    self.store.set_expiry(key.as_str(), policy.window()).await?;
                }
                Ok(count)
            }
        }
    }
}

/// Log a rejected request, splitting the key built under `prefix` back into
/// its resource and client.
pub(crate) fn log_rejection(key: &RateLimitKey, prefix: &str, count: u64, max_count: u64) {
    match key.split(prefix) {
        Some((resource, client)) => info!(
            key = %key,
            resource = resource,
            client = %client,
            count = count,
            max_count = max_count,
            "Rate limit exceeded"
        ),
        None => info!(key = %key, count = count, max_count = max_count, "Rate limit exceeded"),
    }
}
