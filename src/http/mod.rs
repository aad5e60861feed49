//! HTTP surfaces: the route middleware and the standalone check service.

mod identity;
mod middleware;
mod server;
mod service;

pub use identity::ClientContext;
pub use middleware::{rate_limit, RouteGuard};
pub use server::HttpServer;
pub use service::{should_rate_limit, CheckCode, CheckRequest, CheckResponse, CheckService};
