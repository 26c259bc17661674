//! Rate limiter definitions loaded from configuration.
//!
//! Each rule names an outbound resource and gives its bucket parameters,
//! either as a per-second refill rate or as requests per time unit:
//!
//! ```yaml
//! limiters:
//!   - name: coingecko
//!     capacity: 10
//!     refill_rate: 5
//!   - name: etherscan
//!     capacity: 5
//!     requests_per_unit: 300
//!     unit: minute
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::bucket::BucketConfig;
use crate::error::{HotpathError, Result};

/// A set of limiter rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterRules {
    #[serde(default)]
    pub limiters: Vec<LimiterRule>,
}

/// Bucket parameters for one named resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterRule {
    /// Resource name used for registry lookups
    pub name: String,
    /// Burst size
    pub capacity: f64,
    /// Tokens per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<f64>,
    /// Tokens per `unit`, an alternative to `refill_rate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_unit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<TimeUnit>,
}

/// Time unit for `requests_per_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl LimiterRule {
    /// Resolve the rule into bucket parameters.
    pub fn bucket_config(&self) -> Result<BucketConfig> {
        let refill_rate = match (self.refill_rate, self.requests_per_unit, self.unit) {
            (Some(rate), None, None) => rate,
            (None, Some(requests), Some(unit)) => requests / unit.duration().as_secs_f64(),
            (None, Some(_), None) => {
                return Err(HotpathError::Config(format!(
                    "Limiter {}: requests_per_unit requires a unit",
                    self.name
                )))
            }
            (None, None, _) => {
                return Err(HotpathError::Config(format!(
                    "Limiter {}: one of refill_rate or requests_per_unit is required",
                    self.name
                )))
            }
            _ => {
                return Err(HotpathError::Config(format!(
                    "Limiter {}: refill_rate and requests_per_unit are mutually exclusive",
                    self.name
                )))
            }
        };

        let config = BucketConfig::new(self.capacity, refill_rate);
        config.validate()?;
        Ok(config)
    }
}

impl LimiterRules {
    /// Build a rule set, rejecting duplicate names.
    pub fn new(limiters: Vec<LimiterRule>) -> Result<Self> {
        let rules = Self { limiters };
        rules.check_unique()?;
        Ok(rules)
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limiter rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: LimiterRules = serde_yaml::from_str(yaml).map_err(|e| {
            HotpathError::Config(format!("Failed to parse rate limiter rules: {}", e))
        })?;
        rules.check_unique()?;
        Ok(rules)
    }

    fn check_unique(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.limiters {
            if !seen.insert(rule.name.as_str()) {
                return Err(HotpathError::Config(format!(
                    "Duplicate rate limiter name: {}",
                    rule.name
                )));
            }
        }
        Ok(())
    }

    /// Combine two rule sets; rules in `other` replace same-named rules here.
    pub fn merge(mut self, other: LimiterRules) -> Self {
        for rule in other.limiters {
            match self.limiters.iter_mut().find(|r| r.name == rule.name) {
                Some(existing) => *existing = rule,
                None => self.limiters.push(rule),
            }
        }
        self
    }

    /// Find the rule for a resource name.
    pub fn get(&self, name: &str) -> Option<&LimiterRule> {
        self.limiters.iter().find(|rule| rule.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_refill_rate_rule() {
        let yaml = r#"
limiters:
  - name: coingecko
    capacity: 10
    refill_rate: 5
"#;
        let rules = LimiterRules::from_yaml(yaml).unwrap();
        let config = rules.get("coingecko").unwrap().bucket_config().unwrap();
        assert_eq!(config, BucketConfig::new(10.0, 5.0));
    }

    #[test]
    fn test_parse_per_unit_rule() {
        let yaml = r#"
limiters:
  - name: alphavantage
    capacity: 5
    requests_per_unit: 7200
    unit: hour
"#;
        let rules = LimiterRules::from_yaml(yaml).unwrap();
        let config = rules.get("alphavantage").unwrap().bucket_config().unwrap();
        assert_eq!(config.refill_rate, 2.0);
    }

    #[test]
    fn test_empty_document() {
        let rules = LimiterRules::from_yaml("limiters: []").unwrap();
        assert!(rules.limiters.is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
limiters:
  - name: api
    capacity: 1
    refill_rate: 1
  - name: api
    capacity: 2
    refill_rate: 2
"#;
        assert!(LimiterRules::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_ambiguous_rate_rejected() {
        let yaml = r#"
limiters:
  - name: api
    capacity: 1
    refill_rate: 1
    requests_per_unit: 60
    unit: minute
"#;
        let rules = LimiterRules::from_yaml(yaml).unwrap();
        assert!(rules.get("api").unwrap().bucket_config().is_err());
    }

    #[test]
    fn test_missing_rate_rejected() {
        let yaml = r#"
limiters:
  - name: api
    capacity: 1
"#;
        let rules = LimiterRules::from_yaml(yaml).unwrap();
        assert!(rules.get("api").unwrap().bucket_config().is_err());
    }

    #[test]
    fn test_unit_required_with_requests_per_unit() {
        let yaml = r#"
limiters:
  - name: api
    capacity: 1
    requests_per_unit: 60
"#;
        let rules = LimiterRules::from_yaml(yaml).unwrap();
        assert!(rules.get("api").unwrap().bucket_config().is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(LimiterRules::from_yaml("limiters: [ {").is_err());
    }

    #[test]
    fn test_merge_prefers_other() {
        let base = LimiterRules::from_yaml(
            r#"
limiters:
  - name: a
    capacity: 1
    refill_rate: 1
  - name: b
    capacity: 1
    refill_rate: 1
"#,
        )
        .unwrap();
        let overrides = LimiterRules::from_yaml(
            r#"
limiters:
  - name: b
    capacity: 9
    refill_rate: 3
  - name: c
    capacity: 1
    refill_rate: 1
"#,
        )
        .unwrap();

        let merged = base.merge(overrides);

        assert_eq!(merged.limiters.len(), 3);
        assert_eq!(merged.get("b").unwrap().capacity, 9.0);
    }

    #[test]
    fn test_time_unit_duration() {
        assert_eq!(TimeUnit::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeUnit::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeUnit::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Day.duration(), Duration::from_secs(86400));
    }
}
