//! Composition root wiring one cache, one breaker registry, one health monitor and the
//! default retry policy together

use crate::cache::{CacheStats, ResponseCache};
use crate::config::LayerConfig;
use crate::error::Result;
use crate::error_recovery::{
    CircuitBreakerRegistry, CircuitBreakerStats, CircuitState, RetryExecutor, RetryStats,
};
use crate::health::{HealthMetrics, HealthMonitor, HealthProbe, HealthStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Operator-facing status payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    /// Worst of the health status and the breaker states
    pub status: HealthStatus,
    pub health: HealthMetrics,
    pub circuit_breakers: BTreeMap<String, CircuitBreakerStats>,
    pub cache: CacheStats,
    pub retry: RetryStats,
}

/// The resilience layer of one process
#[derive(Debug)]
pub struct ResilienceLayer {
    cache: Arc<ResponseCache<serde_json::Value>>,
    breakers: CircuitBreakerRegistry,
    health: HealthMonitor,
    retry: RetryExecutor,
}

impl ResilienceLayer {
    /// Build every component from `config`; the probe backs the health monitor
    pub fn new(config: LayerConfig, probe: Arc<dyn HealthProbe>) -> Result<Self> {
        config.validate()?;
        let layer = Self {
            cache: Arc::new(ResponseCache::new(config.cache)?),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker)?,
            health: HealthMonitor::new(probe, config.health)?,
            retry: RetryExecutor::new(config.retry)?,
        };
        info!("Resilience layer initialized");
        Ok(layer)
    }

    pub fn cache(&self) -> &Arc<ResponseCache<serde_json::Value>> {
        &self.cache
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Run `operation` against `dependency`: the breaker fails fast, the retry executor
    /// absorbs transient errors inside it
    ///
    /// The breaker records one outcome per call, after retries are exhausted.
    pub async fn execute<F, Fut, T>(&self, dependency: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breakers.get_breaker(dependency, None).await?;
        breaker
            .execute(move || self.retry.execute(operation))
            .await
    }

    /// Aggregate health, breaker, cache and retry statistics
    pub async fn status_report(&self) -> StatusReport {
        let health = self.health.metrics().await;
        let circuit_breakers = self.breakers.get_all_stats().await;
        let status = overall_status(health.status, circuit_breakers.values());

        StatusReport {
            generated_at: Utc::now(),
            status,
            health,
            circuit_breakers,
            cache: self.cache.stats().await,
            retry: self.retry.get_stats().await,
        }
    }

    /// Stop background tasks
    pub async fn shutdown(&self) {
        self.cache.stop();
        self.health.stop_monitoring().await;
        info!("Resilience layer shut down");
    }
}

fn overall_status<'a>(
    health: HealthStatus,
    breakers: impl Iterator<Item = &'a CircuitBreakerStats>,
) -> HealthStatus {
    let mut any_open = false;
    let mut any_half_open = false;
    for stats in breakers {
        match stats.state {
            CircuitState::Open => any_open = true,
            CircuitState::HalfOpen => any_half_open = true,
            CircuitState::Closed => {}
        }
    }

    if any_open || health == HealthStatus::Unhealthy {
        HealthStatus::Unhealthy
    } else if any_half_open || health == HealthStatus::Degraded {
        HealthStatus::Degraded
    } else {
        health
    }
}
