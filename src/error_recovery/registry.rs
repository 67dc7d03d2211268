//! Named circuit breakers, created on first use

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registry of circuit breakers keyed by dependency name
///
/// Cloning is cheap and yields a handle to the same set of breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers default to `default_config`
    pub fn new(default_config: CircuitBreakerConfig) -> Result<Self> {
        default_config.validate()?;
        Ok(Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            default_config,
        })
    }

    /// Config used for breakers created without an explicit one
    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Get or create the circuit breaker for `name`
    ///
    /// `config` only takes effect when the breaker is created by this call. Passing a
    /// config for a breaker that already exists leaves the existing one untouched.
    pub async fn get_breaker(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Result<Arc<CircuitBreaker>> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            if config.is_some() {
                debug!(dependency = name, "Ignoring config for existing circuit breaker");
            }
            return Ok(breaker.clone());
        }

        let mut breakers = self.breakers.write().await;
        // Another caller may have created it between the two locks
        if let Some(breaker) = breakers.get(name) {
            if config.is_some() {
                debug!(dependency = name, "Ignoring config for existing circuit breaker");
            }
            return Ok(breaker.clone());
        }

        let config = config.unwrap_or_else(|| self.default_config.clone());
        let breaker = Arc::new(CircuitBreaker::new(name, config)?);
        breakers.insert(name.to_string(), breaker.clone());

        info!(dependency = name, "Created new circuit breaker");
        Ok(breaker)
    }

    /// Get all circuit breaker statistics, ordered by name
    pub async fn get_all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        let breakers: Vec<_> = self
            .breakers
            .read()
            .await
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.clone()))
            .collect();

        let mut stats = BTreeMap::new();
        for (name, breaker) in breakers {
            stats.insert(name, breaker.stats().await);
        }
        stats
    }

    /// Reset all circuit breakers
    pub async fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.read().await.values().cloned().collect();
        for breaker in breakers {
            breaker.reset().await;
        }
        info!("Reset all circuit breakers");
    }

    /// Registered dependency names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.breakers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered breakers
    pub async fn len(&self) -> usize {
        self.breakers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.breakers.read().await.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            default_config: CircuitBreakerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_recovery::circuit_breaker::CircuitState;

    #[tokio::test]
    async fn test_same_name_same_breaker() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_breaker("orders", None).await.unwrap();
        let b = registry.get_breaker("orders", None).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reset_all() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        })
        .unwrap();

        for name in ["orders", "users"] {
            let breaker = registry.get_breaker(name, None).await.unwrap();
            breaker.record_failure().await;
        }
        let stats = registry.get_all_stats().await;
        assert!(stats.values().all(|s| s.state == CircuitState::Open));

        registry.reset_all().await;

        let stats = registry.get_all_stats().await;
        assert_eq!(
            stats.keys().cloned().collect::<Vec<_>>(),
            vec!["orders".to_string(), "users".to_string()]
        );
        assert!(stats.values().all(|s| s.state == CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_registered() {
        let registry = CircuitBreakerRegistry::default();
        let invalid = CircuitBreakerConfig {
            success_threshold: 0,
            ..Default::default()
        };

        assert!(registry.get_breaker("orders", Some(invalid)).await.is_err());
        assert!(registry.is_empty().await);
    }
}
