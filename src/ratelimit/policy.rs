//! Rate limit policy attached to a protected operation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest window a counter store can be asked to expire, in milliseconds.
///
/// Redis takes PEXPIRE arguments as signed 64-bit integers.
pub const MAX_WINDOW_MS: u64 = i64::MAX as u64;

/// Errors raised while building a policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("window must be at least one millisecond")]
    ZeroWindow,
    #[error("max_count must be at least one")]
    ZeroMaxCount,
    #[error("window must not exceed {} milliseconds", MAX_WINDOW_MS)]
    WindowTooLarge,
}

/// An immutable `(window, max count)` pair.
///
/// At most `max_count` requests sharing a key are admitted inside one fixed
/// window of `window` length. The window starts at the first request for the
/// key and is never extended by later requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicySpec", into = "PolicySpec")]
pub struct RateLimitPolicy {
    window: Duration,
    max_count: u64,
}

impl RateLimitPolicy {
    /// Create a policy, rejecting a zero or oversized window and a zero count.
    pub fn new(window: Duration, max_count: u64) -> Result<Self, PolicyError> {
        let window_ms = window.as_millis();
        if window_ms == 0 {
            return Err(PolicyError::ZeroWindow);
        }
        if window_ms > u128::from(MAX_WINDOW_MS) {
            return Err(PolicyError::WindowTooLarge);
        }
        if max_count == 0 {
            return Err(PolicyError::ZeroMaxCount);
        }
        Ok(Self { window, max_count })
    }

    /// Convenience constructor taking the window in milliseconds.
    pub fn from_millis(window_ms: u64, max_count: u64) -> Result<Self, PolicyError> {
        Self::new(Duration::from_millis(window_ms), max_count)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_millis(&self) -> u64 {
        // Bounded by MAX_WINDOW_MS at construction
        u64::try_from(self.window.as_millis()).unwrap_or(MAX_WINDOW_MS)
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Whether a post-increment count is over the threshold.
    pub fn is_exceeded_by(&self, count: u64) -> bool {
        count > self.max_count
    }
}

/// Wire form of a policy as it appears in YAML and JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PolicySpec {
    window_ms: u64,
    max_count: u64,
}

impl TryFrom<PolicySpec> for RateLimitPolicy {
    type Error = PolicyError;

    fn try_from(spec: PolicySpec) -> Result<Self, Self::Error> {
        RateLimitPolicy::from_millis(spec.window_ms, spec.max_count)
    }
}

impl From<RateLimitPolicy> for PolicySpec {
    fn from(policy: RateLimitPolicy) -> Self {
        PolicySpec {
            window_ms: policy.window_millis(),
            max_count: policy.max_count,
        }
    }
}
