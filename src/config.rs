//! Configuration for change feed processing and throughput control.
//!
//! Both configurations are plain structs with sensible defaults, can be loaded
//! from environment variables, and expose a `validate()` method that collects
//! every problem instead of stopping at the first one:
//!
//! ```rust,no_run
//! use feedlease::config::{FeedConfig, ThroughputControlConfig, ThroughputControlGroup};
//!
//! let feed = FeedConfig::from_env().expect("valid feed configuration");
//!
//! let throughput = ThroughputControlConfig {
//!     groups: vec![
//!         ThroughputControlGroup::new("interactive").with_default(),
//!         ThroughputControlGroup::new("batch").with_target_throughput(400.0),
//!     ],
//!     ..Default::default()
//! };
//! throughput.validate().expect("valid throughput configuration");
//! ```

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CONTROLLER_CACHE_CAPACITY, DEFAULT_FEED_POLL_DELAY_MS, DEFAULT_MAX_ITEM_COUNT,
    DEFAULT_MAX_SCALE_COUNT, DEFAULT_THROUGHPUT_CYCLE_MS,
};
use crate::error::{FeedError, FeedResult};

// ============================================================================
// Change feed processing
// ============================================================================

/// Settings for a change feed processor instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Owner name written on leases claimed by this instance.
    pub instance_name: String,

    /// Maximum number of changes requested per read.
    pub max_item_count: usize,

    /// Delay before polling again after an empty read.
    pub feed_poll_delay: Duration,

    /// Maximum number of leases this instance may own; zero disables the
    /// limit. When set, successor leases are left for the load balancer.
    pub max_scale_count: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            instance_name: format!("feedlease-{}", uuid::Uuid::new_v4()),
            max_item_count: DEFAULT_MAX_ITEM_COUNT,
            feed_poll_delay: Duration::from_millis(DEFAULT_FEED_POLL_DELAY_MS),
            max_scale_count: DEFAULT_MAX_SCALE_COUNT,
        }
    }
}

impl FeedConfig {
    /// Load configuration from environment variables.
    ///
    /// - `FEED_INSTANCE_NAME`: Lease owner name (default: random)
    /// - `FEED_MAX_ITEM_COUNT`: Changes per read (default: 100)
    /// - `FEED_POLL_DELAY_MS`: Delay after an empty read (default: 5000)
    /// - `FEED_MAX_SCALE_COUNT`: Lease limit per instance (default: 0, unlimited)
    pub fn from_env() -> FeedResult<Self> {
        let defaults = Self::default();

        let instance_name =
            std::env::var("FEED_INSTANCE_NAME").unwrap_or(defaults.instance_name);

        let max_item_count: usize =
            parse_env("FEED_MAX_ITEM_COUNT")?.unwrap_or(defaults.max_item_count);

        let feed_poll_delay = parse_env::<u64>("FEED_POLL_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.feed_poll_delay);

        let max_scale_count: usize =
            parse_env("FEED_MAX_SCALE_COUNT")?.unwrap_or(defaults.max_scale_count);

        let config = Self {
            instance_name,
            max_item_count,
            feed_poll_delay,
            max_scale_count,
        };
        config
            .validate()
            .map_err(|errors| FeedError::Config(errors.join("; ")))?;
        Ok(config)
    }

    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.instance_name.trim().is_empty() {
            errors.push("instance_name must not be empty".to_string());
        }
        if self.max_item_count == 0 {
            errors.push("max_item_count must be greater than 0".to_string());
        }
        if self.feed_poll_delay.is_zero() {
            errors.push("feed_poll_delay must be greater than 0".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

// ============================================================================
// Throughput control
// ============================================================================

/// Server-side priority hint attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    High,
    Low,
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityLevel::High => write!(f, "high"),
            PriorityLevel::Low => write!(f, "low"),
        }
    }
}

/// A named throughput-control policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputControlGroup {
    /// Group name, unique within a configuration.
    pub name: String,

    /// Requests without a group, or naming an unknown group, use the default.
    #[serde(default)]
    pub is_default: bool,

    /// Priority level stamped on requests.
    #[serde(default)]
    pub priority_level: Option<PriorityLevel>,

    /// Server-side throughput bucket stamped on requests.
    #[serde(default)]
    pub throughput_bucket: Option<u32>,

    /// Request units admitted per throughput cycle; `None` means unlimited.
    #[serde(default)]
    pub target_throughput: Option<f64>,

    /// Tag added to request diagnostics. Defaults to the group name.
    #[serde(default)]
    pub diagnostics_tag: String,
}

impl ThroughputControlGroup {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            diagnostics_tag: name.clone(),
            name,
            is_default: false,
            priority_level: None,
            throughput_bucket: None,
            target_throughput: None,
        }
    }

    pub fn with_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_priority_level(mut self, level: PriorityLevel) -> Self {
        self.priority_level = Some(level);
        self
    }

    pub fn with_throughput_bucket(mut self, bucket: u32) -> Self {
        self.throughput_bucket = Some(bucket);
        self
    }

    pub fn with_target_throughput(mut self, request_units: f64) -> Self {
        self.target_throughput = Some(request_units);
        self
    }

    pub fn with_diagnostics_tag(mut self, tag: impl Into<String>) -> Self {
        self.diagnostics_tag = tag.into();
        self
    }
}

/// Throughput-control settings for one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputControlConfig {
    /// Configured groups; an empty list disables throughput control.
    pub groups: Vec<ThroughputControlGroup>,

    /// Fail construction when groups exist but none is marked default.
    pub require_default: bool,

    /// Length of a budget cycle for groups with a target throughput.
    pub throughput_cycle: Duration,

    /// Maximum number of group controllers kept in the controller cache.
    pub controller_cache_capacity: u64,
}

impl Default for ThroughputControlConfig {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            require_default: false,
            throughput_cycle: Duration::from_millis(DEFAULT_THROUGHPUT_CYCLE_MS),
            controller_cache_capacity: DEFAULT_CONTROLLER_CACHE_CAPACITY,
        }
    }
}

impl ThroughputControlConfig {
    /// The group marked default, if any.
    pub fn default_group(&self) -> Option<&ThroughputControlGroup> {
        self.groups.iter().find(|g| g.is_default)
    }

    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for group in &self.groups {
            if group.name.trim().is_empty() {
                errors.push("throughput group name must not be empty".to_string());
            } else if !seen.insert(group.name.as_str()) {
                errors.push(format!("duplicate throughput group {}", group.name));
            }
            if let Some(target) = group.target_throughput
                && !(target > 0.0 && target.is_finite())
            {
                errors.push(format!(
                    "target_throughput for group {} must be a positive number, got {}",
                    group.name, target
                ));
            }
        }

        let defaults: Vec<&str> = self
            .groups
            .iter()
            .filter(|g| g.is_default)
            .map(|g| g.name.as_str())
            .collect();
        if defaults.len() > 1 {
            errors.push(format!(
                "at most one default throughput group allowed, found {}",
                defaults.join(", ")
            ));
        }
        if self.require_default && !self.groups.is_empty() && defaults.is_empty() {
            errors.push(
                "a default throughput group is required but none is configured".to_string(),
            );
        }

        if self.throughput_cycle.is_zero() {
            errors.push("throughput_cycle must be greater than 0".to_string());
        }
        if self.controller_cache_capacity == 0 {
            errors.push("controller_cache_capacity must be greater than 0".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Parse an optional environment variable.
fn parse_env<T>(key: &str) -> FeedResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| FeedError::Config(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_config_default_is_valid() {
        let config = FeedConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.instance_name.starts_with("feedlease-"));
    }

    #[test]
    fn test_feed_config_collects_all_errors() {
        let config = FeedConfig {
            instance_name: " ".to_string(),
            max_item_count: 0,
            feed_poll_delay: Duration::ZERO,
            max_scale_count: 0,
        };
        assert_eq!(config.validate().unwrap_err().len(), 3);
    }

    #[test]
    fn test_throughput_config_default_is_valid() {
        assert!(ThroughputControlConfig::default().validate().is_ok());
    }

    #[test]
    fn test_two_defaults_rejected() {
        let config = ThroughputControlConfig {
            groups: vec![
                ThroughputControlGroup::new("a").with_default(),
                ThroughputControlGroup::new("b").with_default(),
            ],
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("at most one default"));
    }

    #[test]
    fn test_duplicate_and_empty_names_rejected() {
        let config = ThroughputControlConfig {
            groups: vec![
                ThroughputControlGroup::new("a"),
                ThroughputControlGroup::new("a"),
                ThroughputControlGroup::new(""),
            ],
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().len(), 2);
    }

    #[test]
    fn test_required_default_missing() {
        let config = ThroughputControlConfig {
            groups: vec![ThroughputControlGroup::new("a")],
            require_default: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Without groups there is nothing to fall back to.
        let config = ThroughputControlConfig {
            require_default: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_target_throughput_rejected() {
        let config = ThroughputControlConfig {
            groups: vec![ThroughputControlGroup::new("a").with_target_throughput(0.0)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_group_builder_defaults_diagnostics_tag() {
        let group = ThroughputControlGroup::new("batch")
            .with_priority_level(PriorityLevel::Low)
            .with_throughput_bucket(3);
        assert_eq!(group.diagnostics_tag, "batch");
        assert_eq!(group.priority_level, Some(PriorityLevel::Low));
        assert_eq!(group.throughput_bucket, Some(3));
        assert!(!group.is_default);
    }
}
