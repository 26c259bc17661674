//! Hotpath - caching and outbound rate limiting for a trading dashboard
//!
//! This crate provides the two primitives behind the dashboard's hot paths:
//! a two-tier cache (a bounded in-memory LRU in front of a durable keyed store)
//! and a registry of token buckets that pace calls to rate-limited
//! third-party APIs. Both live in a [`context::Context`] built once at startup.

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod ratelimit;
