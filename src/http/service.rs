//! Rate limit check service.
//!
//! Lets a gateway or another service ask for an admission decision without
//! embedding the limiter: `POST /v1/ratelimit`.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::ratelimit::{
    log_rejection, Decision, KeyBuilder, PolicyTable, RateLimitError, RateLimitPolicy,
    RateLimiter,
};

/// Shared state of the check service.
#[derive(Debug, Clone)]
pub struct CheckService {
    limiter: RateLimiter,
    keys: KeyBuilder,
    policies: Arc<RwLock<PolicyTable>>,
}

impl CheckService {
    pub fn new(limiter: RateLimiter, keys: KeyBuilder, policies: Arc<RwLock<PolicyTable>>) -> Self {
        Self {
            limiter,
            keys,
            policies,
        }
    }

    /// Replace the policy table in place.
    pub fn set_policies(&self, table: PolicyTable) {
        *self.policies.write() = table;
    }

    /// Policy for a request: inline override, then the table.
    fn resolve_policy(&self, request: &CheckRequest) -> Option<RateLimitPolicy> {
        request
            .policy
            .or_else(|| self.policies.read().find(&request.resource).copied())
    }
}

/// Body of a check request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Resource being accessed, typically a request path
    pub resource: String,
    /// Address of the end client
    #[serde(default)]
    pub client_ip: Option<String>,
    /// Policy to apply instead of the configured one
    #[serde(default)]
    pub policy: Option<RateLimitPolicy>,
}

/// Outcome code of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCode {
    Ok,
    OverLimit,
}

/// Body of a check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub code: CheckCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// The store failed and the request was admitted anyway
    pub degraded: bool,
    /// No policy applies to the resource
    pub unlimited: bool,
}

impl CheckResponse {
    fn unlimited() -> Self {
        Self {
            code: CheckCode::Ok,
            count: None,
            limit: None,
            degraded: false,
            unlimited: true,
        }
    }

    fn from_decision(decision: Decision, policy: &RateLimitPolicy) -> Self {
        let code = match decision {
            Decision::Rejected { .. } => CheckCode::OverLimit,
            Decision::Admitted { .. } | Decision::Degraded => CheckCode::Ok,
        };
        Self {
            code,
            count: decision.count(),
            limit: Some(policy.max_count()),
            degraded: decision == Decision::Degraded,
            unlimited: false,
        }
    }
}

/// Decide whether a request should be rate limited.
///
/// Over-limit is a normal outcome reported in the body; only malformed
/// requests and a closed-mode store failure produce error statuses.
#[instrument(skip_all, fields(resource = %request.resource))]
pub async fn should_rate_limit(
    State(service): State<CheckService>,
    Json(request): Json<CheckRequest>,
) -> Response {
    debug!(request = ?request, "Processing rate limit request");

    if request.resource.is_empty() {
        warn!("Received rate limit request with empty resource");
        return bad_request("resource is required");
    }

    let client = match request.client_ip.as_deref().map(str::parse::<IpAddr>) {
        Some(Ok(ip)) => Some(ip),
        Some(Err(_)) => {
            warn!(client_ip = ?request.client_ip, "Received rate limit request with invalid client_ip");
            return bad_request("client_ip must be an IP address");
        }
        None => None,
    };

    let key = match service.keys.build(client, &request.resource) {
        Ok(key) => key,
        Err(_) => {
            warn!("Received rate limit request without client_ip");
            return bad_request("client_ip is required");
        }
    };

    let Some(policy) = service.resolve_policy(&request) else {
        debug!(key = %key, "No policy applies, admitting");
        return Json(CheckResponse::unlimited()).into_response();
    };

    match service.limiter.evaluate(&key, &policy).await {
        Ok(decision) => {
            if let Decision::Rejected { count, max_count } = decision {
                log_rejection(&key, service.keys.prefix(), count, max_count);
            }
            let response = CheckResponse::from_decision(decision, &policy);
            info!(key = %key, code = ?response.code, "Rate limit decision made");
            Json(response).into_response()
        }
        Err(RateLimitError::StoreUnavailable(err)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "code": "store_unavailable", "message": err.to_string() })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "code": "internal", "message": err.to_string() })),
        )
            .into_response(),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "code": "invalid_argument", "message": message })),
    )
        .into_response()
}
