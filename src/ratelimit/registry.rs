//! Named token buckets.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::bucket::{BucketConfig, TokenBucket};
use super::rules::LimiterRules;
use crate::error::{HotpathError, Result};

/// Maps resource names to their token buckets.
///
/// Populated at startup and read on every outbound call. Callers hold the
/// returned `Arc<TokenBucket>`, so re-registering a name does not affect
/// callers that already fetched the old bucket.
pub struct RateLimiterRegistry {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry holding one bucket per rule.
    pub fn from_rules(rules: &LimiterRules) -> Result<Self> {
        let registry = Self::new();
        for rule in &rules.limiters {
            registry.register(&rule.name, rule.bucket_config()?)?;
        }
        Ok(registry)
    }

    /// Create a full bucket under `name`, replacing any existing one.
    ///
    /// Replacement discards the old bucket's balance.
    pub fn register(&self, name: &str, config: BucketConfig) -> Result<Arc<TokenBucket>> {
        config
            .validate()
            .map_err(|e| HotpathError::Config(format!("Invalid rate limiter {}: {}", name, e)))?;

        let bucket = Arc::new(TokenBucket::new(name, config));
        let previous = self
            .buckets
            .write()
            .insert(name.to_string(), Arc::clone(&bucket));

        if previous.is_some() {
            warn!(
                bucket = %name,
                capacity = config.capacity,
                refill_rate = config.refill_rate,
                "Rate limiter re-registered, counters reset"
            );
        } else {
            info!(
                bucket = %name,
                capacity = config.capacity,
                refill_rate = config.refill_rate,
                "Rate limiter registered"
            );
        }

        Ok(bucket)
    }

    /// The bucket registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<TokenBucket>> {
        self.buckets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HotpathError::NotRegistered(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
