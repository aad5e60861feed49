//! Admission check composed around a protected operation.

use std::future::Future;
use std::net::IpAddr;

use tracing::debug;

use super::key::{KeyBuilder, RateLimitKey};
use super::limiter::{log_rejection, Decision, RateLimitError, RateLimiter};
use super::policy::RateLimitPolicy;

/// Binds a limiter, a key builder and one policy for a protected operation.
#[derive(Debug, Clone)]
pub struct Guard {
    limiter: RateLimiter,
    keys: KeyBuilder,
    policy: RateLimitPolicy,
}

impl Guard {
    pub fn new(limiter: RateLimiter, keys: KeyBuilder, policy: RateLimitPolicy) -> Self {
        Self {
            limiter,
            keys,
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Build the key for this request, then check it against the policy.
    ///
    /// Returns the key alongside the decision so callers can look up the
    /// window's remaining lifetime after a rejection.
    pub async fn admit(
        &self,
        client: Option<IpAddr>,
        resource: &str,
    ) -> Result<(RateLimitKey, Decision), RateLimitError> {
        let key = self.keys.build(client, resource)?;
        let decision = match self.limiter.check(&key, &self.policy).await {
            Ok(decision) => decision,
            Err(err) => {
                if let RateLimitError::ThresholdExceeded {
                    key,
                    count,
                    max_count,
                } = &err
                {
                    log_rejection(key, self.keys.prefix(), *count, *max_count);
                }
                return Err(err);
            }
        };
        debug!(key = %key, decision = ?decision, "Request admitted");
        Ok((key, decision))
    }

    /// Run `operation` only if the request is admitted.
    pub async fn run<F, T>(
        &self,
        client: Option<IpAddr>,
        resource: &str,
        operation: F,
    ) -> Result<T, RateLimitError>
    where
        F: Future<Output = T>,
    {
        self.admit(client, resource).await?;
        Ok(operation.await)
    }
}
