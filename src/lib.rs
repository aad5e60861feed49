//! Tripgate - Per-endpoint request rate limiting
//!
//! This crate implements fixed-window admission control for the trip booking
//! API. Counters live in a shared store (Redis) so every service instance
//! enforces the same limits, and the store is the only synchronization point.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
