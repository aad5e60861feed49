//! Rate limiting logic and counter store access.

mod guard;
mod key;
mod limiter;
mod memory;
mod policy;
mod redis_store;
mod rules;
mod store;

pub use guard::Guard;
pub use key::{KeyBuilder, RateLimitKey, DEFAULT_KEY_PREFIX};
pub use limiter::{Decision, FailureMode, RateLimitError, RateLimiter, WindowStrategy};
pub(crate) use limiter::log_rejection;
pub use memory::InMemoryStore;
pub use policy::{PolicyError, RateLimitPolicy, MAX_WINDOW_MS};
pub use redis_store::RedisStore;
pub use rules::{PolicyTable, RoutePolicy};
pub use store::{CounterStore, StoreError};
