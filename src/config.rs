// Configuration File Support
//
// TOML configuration for the QuotaGuard limiter, with environment variable
// overrides. Loaded from ./quotaguard.toml unless a path is given.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LoggingConfig;
use crate::rate_limit::RateLimitConfig;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "quotaguard.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Limiter thresholds and per-resource limits
    pub limiter: RateLimitConfig,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve the metrics endpoint
    pub enabled: bool,

    /// Port for metrics server
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from `./quotaguard.toml`
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. If the file does not exist, returns the defaults
    /// (with environment overrides applied).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file path
    pub fn config_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - QUOTAGUARD_LOG_LEVEL
    /// - QUOTAGUARD_LOG_FORMAT
    /// - QUOTAGUARD_METRICS_ENABLED
    /// - QUOTAGUARD_METRICS_PORT
    fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(level) = std::env::var("QUOTAGUARD_LOG_LEVEL") {
            self.logging.level = level.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(format) = std::env::var("QUOTAGUARD_LOG_FORMAT") {
            self.logging.format = format.parse().map_err(anyhow::Error::msg)?;
        }

        if let Ok(enabled) = std::env::var("QUOTAGUARD_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Ok(port) = std::env::var("QUOTAGUARD_METRICS_PORT") {
            self.metrics.port = port
                .parse()
                .with_context(|| format!("Invalid QUOTAGUARD_METRICS_PORT: {}", port))?;
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }

        let limiter = &self.limiter;
        if !(limiter.usage_warning_percent > 0.0 && limiter.usage_warning_percent <= 100.0) {
            anyhow::bail!(
                "Usage warning percent must be in (0, 100], got {}",
                limiter.usage_warning_percent
            );
        }

        if limiter.resources.is_empty() {
            anyhow::bail!("At least one resource must be configured");
        }

        for (name, limit) in &limiter.resources {
            limit.validate(name)?;
            if limit.requests_per_minute > limit.requests_per_hour {
                anyhow::bail!(
                    "Resource '{}' allows more requests per minute ({}) than per hour ({})",
                    name,
                    limit.requests_per_minute,
                    limit.requests_per_hour
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogFormat, LogLevel};
    use crate::rate_limit::ResourceLimit;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.limiter.resources.len(), 4);
        assert_eq!(config.limiter.queue_warning_threshold, 100);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_limit() {
        let mut config = Config::default();
        config
            .limiter
            .resources
            .insert("openai".to_string(), ResourceLimit::new(20, 1000, 2, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_minute_above_hour() {
        let mut config = Config::default();
        config
            .limiter
            .resources
            .insert("openai".to_string(), ResourceLimit::new(200, 100, 2, 5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_no_resources() {
        let mut config = Config::default();
        config.limiter.resources.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_warning_percent() {
        let mut config = Config::default();
        config.limiter.usage_warning_percent = 0.0;
        assert!(config.validate().is_err());

        config.limiter.usage_warning_percent = 101.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_metrics_port() {
        let mut config = Config::default();
        config.metrics.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[metrics]
enabled = true
port = 8080

[limiter]
queue_warning_threshold = 50

[limiter.resources.openai]
requests_per_minute = 2
requests_per_hour = 100
base_retry_delay_secs = 2
max_retry_attempts = 5
"#;

        fs::write(temp_file.path(), toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.metrics.port, 8080);
        assert_eq!(config.limiter.queue_warning_threshold, 50);
        assert_eq!(config.limiter.usage_warning_percent, 80.0);
        assert_eq!(config.limiter.resources.len(), 1);
        assert_eq!(
            config.limiter.resources["openai"],
            ResourceLimit::new(2, 100, 2, 5)
        );
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[limiter\nqueue_warning_threshold = ").unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_limits() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[limiter.resources.youtube]
requests_per_minute = 0
requests_per_hour = 1000
base_retry_delay_secs = 1
max_retry_attempts = 3
"#;
        fs::write(temp_file.path(), toml_content).unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(config, parsed);
    }
}
