//! Layer configuration
//!
//! Every section has documented defaults, so an empty TOML document is a valid config.
//! Values are layered as defaults, then an optional file, then `RESILIENCE_*`
//! environment overrides.

use crate::cache::CacheConfig;
use crate::error::{ResilienceError, Result};
use crate::error_recovery::{CircuitBreakerConfig, RetryPolicy};
use crate::health::HealthConfig;
use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration of the whole resilience layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub health: HealthConfig,
}

impl LayerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| ResilienceError::config(format!("invalid configuration: {}", e)))
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `RESILIENCE_*` environment overrides on top of this config
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<usize>("RESILIENCE_CACHE_MAX_ENTRIES")? {
            self.cache.max_entries = v;
        }
        if let Some(v) = env_duration("RESILIENCE_CACHE_DEFAULT_TTL")? {
            self.cache.default_ttl = Some(v).filter(|ttl| !ttl.is_zero());
        }
        if let Some(v) = env_duration("RESILIENCE_CACHE_CLEANUP_INTERVAL")? {
            self.cache.cleanup_interval = v;
        }

        if let Some(v) = env_parse::<u32>("RESILIENCE_CB_FAILURE_THRESHOLD")? {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("RESILIENCE_CB_SUCCESS_THRESHOLD")? {
            self.circuit_breaker.success_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("RESILIENCE_CB_FAILURE_RATE_THRESHOLD")? {
            self.circuit_breaker.failure_rate_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("RESILIENCE_CB_VOLUME_THRESHOLD")? {
            self.circuit_breaker.volume_threshold = v;
        }
        if let Some(v) = env_duration("RESILIENCE_CB_OPEN_DURATION")? {
            self.circuit_breaker.open_duration = v;
        }

        if let Some(v) = env_parse::<u32>("RESILIENCE_RETRY_MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_duration("RESILIENCE_RETRY_BASE_DELAY")? {
            self.retry.base_delay = v;
        }
        if let Some(v) = env_duration("RESILIENCE_RETRY_MAX_DELAY")? {
            self.retry.max_delay = v;
        }
        if let Some(v) = env_duration("RESILIENCE_RETRY_OVERALL_TIMEOUT")? {
            self.retry.overall_timeout = Some(v).filter(|budget| !budget.is_zero());
        }

        if let Some(v) = env_duration("RESILIENCE_HEALTH_INTERVAL")? {
            self.health.check_interval = v;
        }
        if let Some(v) = env_duration("RESILIENCE_HEALTH_PROBE_TIMEOUT")? {
            self.health.probe_timeout = v;
        }

        Ok(self)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.health.validate()?;
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_value(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ResilienceError::config(format!("{}='{}': {}", name, raw, e)))
        })
        .transpose()
}

fn env_duration(name: &str) -> Result<Option<Duration>> {
    env_value(name)
        .map(|raw| {
            humantime::parse_duration(&raw)
                .map_err(|e| ResilienceError::config(format!("{}='{}': {}", name, raw, e)))
        })
        .transpose()
}
