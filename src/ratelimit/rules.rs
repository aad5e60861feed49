//! Per-route rate limit policies.
//!
//! Policies are declared in a YAML file mapping request paths to a window
//! and a threshold, with an optional default for paths not listed.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::policy::RateLimitPolicy;
use crate::error::{Result, TripgateError};

/// A policy bound to one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Request path the policy applies to, without query string
    pub route: String,
    /// Optional name used in logs
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub policy: RateLimitPolicy,
}

/// The full set of route policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Policy for routes not listed below
    #[serde(default)]
    pub default: Option<RateLimitPolicy>,
    #[serde(default)]
    pub routes: Vec<RoutePolicy>,
}

impl PolicyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML file without blocking the runtime.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Reloading rate limit policies");

        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: PolicyTable = serde_yaml::from_str(yaml)
            .map_err(|e| TripgateError::Config(format!("Failed to parse rate limit policies: {}", e)))?;

        for (i, entry) in table.routes.iter().enumerate() {
            if table.routes[..i].iter().any(|other| other.route == entry.route) {
                return Err(TripgateError::Config(format!(
                    "Duplicate policy for route {}",
                    entry.route
                )));
            }
        }

        Ok(table)
    }

    /// The policy declared for exactly this route.
    pub fn route(&self, route: &str) -> Option<&RoutePolicy> {
        self.routes.iter().find(|entry| entry.route == route)
    }

    /// The route's policy, falling back to the default.
    pub fn find(&self, route: &str) -> Option<&RateLimitPolicy> {
        self.route(route)
            .map(|entry| &entry.policy)
            .or(self.default.as_ref())
    }
}
