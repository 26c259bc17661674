//! Token-bucket rate limiting for outbound calls.

mod bucket;
mod registry;
mod rules;

pub use bucket::{BucketConfig, TokenBucket};
pub use registry::RateLimiterRegistry;
pub use rules::{LimiterRule, LimiterRules, TimeUnit};
