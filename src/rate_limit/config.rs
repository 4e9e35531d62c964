//! Quota Registry
//!
//! Static per-resource limits. Built once and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::error::RateLimitError;

/// Default queue depth above which a warning is logged
pub const DEFAULT_QUEUE_WARNING_THRESHOLD: usize = 100;

/// Default hourly utilization (percent) at which a warning is logged
pub const DEFAULT_USAGE_WARNING_PERCENT: f64 = 80.0;

/// Quota for a single named resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimit {
    /// Maximum grants in any one-minute window
    pub requests_per_minute: u32,

    /// Maximum grants in any one-hour window
    pub requests_per_hour: u32,

    /// Delay before the first re-check after saturation
    pub base_retry_delay_secs: u64,

    /// Backoff attempts allowed before admission fails
    pub max_retry_attempts: u32,
}

impl ResourceLimit {
    pub const fn new(
        requests_per_minute: u32,
        requests_per_hour: u32,
        base_retry_delay_secs: u64,
        max_retry_attempts: u32,
    ) -> Self {
        Self {
            requests_per_minute,
            requests_per_hour,
            base_retry_delay_secs,
            max_retry_attempts,
        }
    }

    /// Base backoff delay
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_secs(self.base_retry_delay_secs)
    }

    /// Check that every field is positive
    pub fn validate(&self, resource: &str) -> Result<(), RateLimitError> {
        let zero_field = if self.requests_per_minute == 0 {
            Some("requests_per_minute")
        } else if self.requests_per_hour == 0 {
            Some("requests_per_hour")
        } else if self.base_retry_delay_secs == 0 {
            Some("base_retry_delay_secs")
        } else if self.max_retry_attempts == 0 {
            Some("max_retry_attempts")
        } else {
            None
        };

        match zero_field {
            Some(field) => Err(RateLimitError::InvalidLimit {
                resource: resource.to_string(),
                reason: format!("{} must be > 0", field),
            }),
            None => Ok(()),
        }
    }
}

/// Reference limits for the four built-in integrations
pub fn default_limits() -> BTreeMap<String, ResourceLimit> {
    [
        ("openai", ResourceLimit::new(20, 1000, 2, 5)),
        ("unsplash", ResourceLimit::new(50, 500, 1, 3)),
        ("youtube", ResourceLimit::new(100, 1000, 1, 3)),
        ("wordpress", ResourceLimit::new(30, 300, 3, 4)),
    ]
    .into_iter()
    .map(|(name, limit)| (name.to_string(), limit))
    .collect()
}

/// Resource name to limit mapping
#[derive(Debug, Clone)]
pub struct QuotaRegistry {
    limits: BTreeMap<String, ResourceLimit>,
}

impl QuotaRegistry {
    /// Build a registry, rejecting any limit with a zero field
    pub fn new(limits: BTreeMap<String, ResourceLimit>) -> Result<Self, RateLimitError> {
        for (name, limit) in &limits {
            limit.validate(name)?;
        }
        Ok(Self { limits })
    }

    /// Look up the limit for a resource
    pub fn get(&self, resource: &str) -> Result<&ResourceLimit, RateLimitError> {
        self.limits
            .get(resource)
            .ok_or_else(|| RateLimitError::UnknownResource(resource.to_string()))
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.limits.contains_key(resource)
    }

    /// Registered resource names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.limits.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceLimit)> {
        self.limits.iter().map(|(name, limit)| (name.as_str(), limit))
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

impl Default for QuotaRegistry {
    fn default() -> Self {
        Self {
            limits: default_limits(),
        }
    }
}

/// Limiter settings: registry contents plus observability thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Queue depth above which a warning is logged
    pub queue_warning_threshold: usize,

    /// Hourly utilization percentage at which a warning is logged
    pub usage_warning_percent: f64,

    /// Per-resource limits
    pub resources: BTreeMap<String, ResourceLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            queue_warning_threshold: DEFAULT_QUEUE_WARNING_THRESHOLD,
            usage_warning_percent: DEFAULT_USAGE_WARNING_PERCENT,
            resources: default_limits(),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config with a single resource, mostly for tests and the CLI
    pub fn single(resource: &str, limit: ResourceLimit) -> Self {
        Self {
            resources: BTreeMap::from([(resource.to_string(), limit)]),
            ..Self::default()
        }
    }

    /// Add or replace a resource limit
    pub fn with_resource(mut self, resource: &str, limit: ResourceLimit) -> Self {
        self.resources.insert(resource.to_string(), limit);
        self
    }

    /// Build the registry described by this config
    pub fn registry(&self) -> Result<QuotaRegistry, RateLimitError> {
        QuotaRegistry::new(self.resources.clone())
    }
}
