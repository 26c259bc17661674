//! Process-wide state handed to request handlers.

use std::sync::Arc;
use tracing::{error, info};

use crate::cache::{DurableStore, JsonFileStore, MemoryStore, TieredCache};
use crate::config::HotpathConfig;
use crate::error::Result;
use crate::ratelimit::RateLimiterRegistry;

/// The cache and rate limiters, built once at startup and shared by handle.
pub struct Context {
    config: HotpathConfig,
    cache: TieredCache,
    limiters: RateLimiterRegistry,
}

impl Context {
    /// Build the context described by `config`.
    ///
    /// A file store that cannot be opened is logged and replaced by an
    /// in-process store: the cache keeps working, only without persistence.
    /// Invalid limiter rules are an error.
    pub async fn from_config(config: HotpathConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let store: Arc<dyn DurableStore> = match &config.cache.store_path {
            Some(path) => match JsonFileStore::open(path).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "Failed to open cache store, falling back to in-process store"
                    );
                    Arc::new(MemoryStore::new())
                }
            },
            None => Arc::new(MemoryStore::new()),
        };

        Self::with_store(config, store)
    }

    /// Build the context over an explicit durable store.
    pub fn with_store(config: HotpathConfig, store: Arc<dyn DurableStore>) -> Result<Arc<Self>> {
        config.validate()?;

        let rules = config.rate_limiting.load_rules()?;
        let limiters = RateLimiterRegistry::from_rules(&rules)?;
        let cache = TieredCache::new(store, &config.cache);

        info!(
            memory_capacity = config.cache.memory_capacity,
            default_ttl_secs = config.cache.default_ttl_secs,
            limiters = limiters.len(),
            "Context initialized"
        );

        Ok(Arc::new(Self {
            config,
            cache,
            limiters,
        }))
    }

    pub fn config(&self) -> &HotpathConfig {
        &self.config
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }
}
