//! Configuration management for Hotpath.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HotpathError, Result};
use crate::ratelimit::{LimiterRule, LimiterRules};

/// Main configuration for Hotpath.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotpathConfig {
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held in memory
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Default entry lifetime in seconds, for callers that do not pick one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// JSON file backing the durable tier; in-process when unset
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Seconds between expiry sweeps; 0 disables sweeping
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            default_ttl_secs: default_ttl_secs(),
            store_path: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn default_memory_capacity() -> usize {
    1000
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a YAML file of limiter rules
    pub config_path: Option<String>,

    /// Rules declared inline; the file's rules win on name clashes
    #[serde(default)]
    pub limiters: Vec<LimiterRule>,
}

impl RateLimitingConfig {
    /// Inline rules merged with the rules file, if any.
    pub fn load_rules(&self) -> Result<LimiterRules> {
        let inline = LimiterRules::new(self.limiters.clone())?;
        match &self.config_path {
            Some(path) => Ok(inline.merge(LimiterRules::from_file(path)?)),
            None => Ok(inline),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl HotpathConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: HotpathConfig =
            serde_yaml::from_str(yaml).map_err(|e| HotpathError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.cache.memory_capacity == 0 {
            return Err(HotpathError::Config(
                "cache.memory_capacity must be greater than 0".to_string(),
            ));
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(HotpathError::Config(
                "cache.default_ttl_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
