//! Pipeline configuration.
//!
//! Every value has a default and can be overridden from YAML or from
//! `PADDOCK_*` environment variables.
//!
//! ```rust
//! use paddock::PipelineConfig;
//!
//! let config = PipelineConfig::from_yaml_str("rate_limit:\n  delay_ms: 500\n").unwrap();
//! assert_eq!(config.rate_limit.delay_ms, 500);
//! assert_eq!(config.rate_limit.batch_size, 5);
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{Result, ResultsError};

/// Upper bound for `delay_ms` (ten minutes).
pub const MAX_DELAY_MS: u64 = 10 * 60 * 1000;

/// Upper bound for `retry_delay_multiplier`.
pub const MAX_RETRY_DELAY_MULTIPLIER: f64 = 100.0;

/// Upper bound for cache durations (one year).
pub const MAX_CACHE_SECS: u64 = 365 * 24 * 60 * 60;

/// Settings for per-participant lap fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// When false, lap fetching is skipped and results carry empty lap lists
    pub enabled: bool,
    /// Minimum delay between consecutive lap endpoint calls
    pub delay_ms: u64,
    /// Participants per batch; an extra `delay_ms` pause separates batches
    pub batch_size: usize,
    /// Hard cap on participants fetched per race
    pub max_participants: usize,
    /// Applied to the next delay after a throttled call
    pub retry_delay_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 250,
            batch_size: 5,
            max_participants: 60,
            retry_delay_multiplier: 2.0,
        }
    }
}

impl RateLimitConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Settings for the in-memory caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lap data time-to-live in seconds
    pub lap_ttl_secs: u64,
    /// Interval between background sweeps in seconds
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { lap_ttl_secs: 60 * 60, sweep_interval_secs: 5 * 60 }
    }
}

impl CacheConfig {
    pub fn lap_ttl(&self) -> Duration {
        Duration::from_secs(self.lap_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Top-level configuration for [`ResultService`](crate::ResultService).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
}

impl PipelineConfig {
    /// Parse and validate configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| ResultsError::config(format!("YAML parsing failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml_str(&yaml)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded pipeline configuration");
        Ok(config)
    }

    /// Apply `PADDOCK_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, mainly for tests.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rate = &mut self.rate_limit;
        if let Some(value) = lookup("PADDOCK_LAP_FETCH_ENABLED") {
            rate.enabled = parse_override("PADDOCK_LAP_FETCH_ENABLED", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_LAP_DELAY_MS") {
            rate.delay_ms = parse_override("PADDOCK_LAP_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_LAP_BATCH_SIZE") {
            rate.batch_size = parse_override("PADDOCK_LAP_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_MAX_PARTICIPANTS") {
            rate.max_participants = parse_override("PADDOCK_MAX_PARTICIPANTS", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_RETRY_DELAY_MULTIPLIER") {
            rate.retry_delay_multiplier = parse_override("PADDOCK_RETRY_DELAY_MULTIPLIER", &value)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rate = &self.rate_limit;
        if rate.batch_size == 0 {
            return Err(ResultsError::config("batch_size must be at least 1"));
        }
        if rate.max_participants == 0 {
            return Err(ResultsError::config("max_participants must be at least 1"));
        }
        if rate.delay_ms > MAX_DELAY_MS {
            return Err(ResultsError::config(format!(
                "delay_ms must be at most {}, got {}",
                MAX_DELAY_MS, rate.delay_ms
            )));
        }
        if !(1.0..=MAX_RETRY_DELAY_MULTIPLIER).contains(&rate.retry_delay_multiplier) {
            return Err(ResultsError::config(format!(
                "retry_delay_multiplier must be between 1.0 and {}, got {}",
                MAX_RETRY_DELAY_MULTIPLIER, rate.retry_delay_multiplier
            )));
        }
        if self.cache.lap_ttl_secs == 0 {
            return Err(ResultsError::config("lap_ttl_secs must be positive"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(ResultsError::config("sweep_interval_secs must be positive"));
        }
        if self.cache.lap_ttl_secs > MAX_CACHE_SECS || self.cache.sweep_interval_secs > MAX_CACHE_SECS {
            return Err(ResultsError::config(format!(
                "lap_ttl_secs and sweep_interval_secs must be at most {}",
                MAX_CACHE_SECS
            )));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ResultsError::config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.lap_ttl(), Duration::from_secs(3600));
        assert_eq!(config.rate_limit.delay(), Duration::from_millis(250));
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let yaml = "rate_limit:\n  enabled: false\n  max_participants: 3\ncache:\n  lap_ttl_secs: 60\n";
        let config = PipelineConfig::from_yaml_str(yaml).expect("config should parse");
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.max_participants, 3);
        assert_eq!(config.rate_limit.delay_ms, 250);
        assert_eq!(config.cache.lap_ttl_secs, 60);
    }

    #[test]
    fn env_style_overrides() {
        let vars: HashMap<&str, &str> =
            [("PADDOCK_LAP_DELAY_MS", "1000"), ("PADDOCK_RETRY_DELAY_MULTIPLIER", "3.5")].into();

        let config = PipelineConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("overrides should apply");

        assert_eq!(config.rate_limit.delay_ms, 1000);
        assert_eq!(config.rate_limit.retry_delay_multiplier, 3.5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = PipelineConfig::from_yaml_str("rate_limit:\n  batch_size: 0\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);

        let err = PipelineConfig::default()
            .with_overrides(|key| (key == "PADDOCK_LAP_BATCH_SIZE").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PADDOCK_LAP_BATCH_SIZE"));

        let err = PipelineConfig::from_yaml_str("rate_limit:\n  retry_delay_multiplier: 0.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("retry_delay_multiplier"));
    }

    #[test]
    fn unbounded_values_are_rejected() {
        let err = PipelineConfig::from_yaml_str("rate_limit:\n  retry_delay_multiplier: .inf\n").unwrap_err();
        assert!(err.to_string().contains("retry_delay_multiplier"));

        let err = PipelineConfig::from_yaml_str("rate_limit:\n  retry_delay_multiplier: .nan\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);

        let err = PipelineConfig::default()
            .with_overrides(|key| (key == "PADDOCK_RETRY_DELAY_MULTIPLIER").then(|| "inf".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("retry_delay_multiplier"));

        let err = PipelineConfig::from_yaml_str("cache:\n  lap_ttl_secs: 18446744073709551615\n").unwrap_err();
        assert!(err.to_string().contains("lap_ttl_secs"));

        let err = PipelineConfig::from_yaml_str("rate_limit:\n  delay_ms: 18446744073709551615\n").unwrap_err();
        assert!(err.to_string().contains("delay_ms"));

        let at_limits = format!(
            "rate_limit:\n  delay_ms: {}\n  retry_delay_multiplier: {}\ncache:\n  lap_ttl_secs: {}\n",
            MAX_DELAY_MS, MAX_RETRY_DELAY_MULTIPLIER, MAX_CACHE_SECS
        );
        assert!(PipelineConfig::from_yaml_str(&at_limits).is_ok());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = PipelineConfig::from_yaml_file("/nonexistent/paddock.yaml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/paddock.yaml"));
    }
}
