//! Periodic health probing of a downstream dependency
//!
//! The monitor runs off the request path. Each probe is bounded by a timeout, its latency
//! is measured, and the outcome is folded into running metrics and a bounded history.

use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lightweight round trip against the monitored dependency
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    /// Perform one no-op request; the returned payload becomes the check's details
    async fn ping(&self) -> Result<serde_json::Value>;
}

/// Health monitoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval used by [`HealthMonitor::start_default_monitoring`]
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Upper bound for a single probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Latency above this logs a warning and degrades the status
    #[serde(with = "humantime_serde")]
    pub latency_warning: Duration,
    /// Latency above this logs an error
    #[serde(with = "humantime_serde")]
    pub latency_critical: Duration,
    /// Maximum retained check results
    pub max_history: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            latency_warning: Duration::from_millis(500),
            latency_critical: Duration::from_secs(2),
            max_history: 120, // 1 hour at 30-second intervals
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(ResilienceError::config(
                "health.check_interval must be greater than zero",
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(ResilienceError::config(
                "health.probe_timeout must be greater than zero",
            ));
        }
        if self.latency_warning > self.latency_critical {
            return Err(ResilienceError::config(
                "health.latency_warning must not exceed health.latency_critical",
            ));
        }
        Ok(())
    }
}

/// Overall dependency health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last probe succeeded within the warning latency
    Healthy,
    /// Last probe succeeded but slowly
    Degraded,
    /// Last probe failed
    Unhealthy,
    /// No probe has run yet
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
    pub latency_ms: u64,
    /// Probe payload, or the error description for failed checks
    pub details: serde_json::Value,
}

/// Aggregated health metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub checks_performed: u64,
    pub failed_checks: u64,
    pub total_latency_ms: u64,
    pub last_latency_ms: Option<u64>,
    pub last_check_time: Option<DateTime<Utc>>,
    pub is_healthy: bool,
    /// Mean probe latency over all checks, zero before the first
    pub average_latency_ms: f64,
    /// Successful checks as `NN.NN%`, `N/A` before the first
    pub success_rate: String,
    pub status: HealthStatus,
}

#[derive(Debug, Default)]
struct HealthSample {
    checks_performed: u64,
    failed_checks: u64,
    total_latency_ms: u64,
    last_latency_ms: Option<u64>,
    last_check_time: Option<DateTime<Utc>>,
    is_healthy: bool,
}

#[derive(Debug, Default)]
struct MonitorState {
    sample: HealthSample,
    history: VecDeque<HealthCheckResult>,
}

struct MonitorInner {
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
    state: RwLock<MonitorState>,
}

struct MonitorTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Health monitor for one dependency
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<MonitorTask>>,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(probe: Arc<dyn HealthProbe>, config: HealthConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(MonitorInner {
                probe,
                config,
                state: RwLock::new(MonitorState::default()),
            }),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &HealthConfig {
        &self.inner.config
    }

    /// Run a single probe and record its outcome
    pub async fn perform_check(&self) -> HealthCheckResult {
        self.inner.perform_check().await
    }

    /// Probe every `interval` until stopped; the first probe runs one interval from now
    ///
    /// Starting an already running monitor logs a warning and changes nothing.
    pub async fn start_monitoring(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(ResilienceError::config(
                "health monitoring interval must be greater than zero",
            ));
        }

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            warn!("Health monitoring already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ResilienceError::config("health monitoring requires a running tokio runtime")
        })?;

        let shutdown = CancellationToken::new();
        let inner = self.inner.clone();
        let token = shutdown.clone();
        let handle = runtime.spawn(async move {
            inner.monitoring_loop(interval, token).await;
        });

        *task = Some(MonitorTask { shutdown, handle });
        info!(
            interval_ms = interval.as_millis() as u64,
            "Health monitoring started"
        );
        Ok(())
    }

    /// Start monitoring with the configured check interval
    pub async fn start_default_monitoring(&self) -> Result<()> {
        self.start_monitoring(self.inner.config.check_interval).await
    }

    /// Stop the monitoring task; no-op when not running
    pub async fn stop_monitoring(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.shutdown.cancel();
            info!("Health monitoring stopped");
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Get aggregated metrics
    pub async fn metrics(&self) -> HealthMetrics {
        let state = self.inner.state.read().await;
        let sample = &state.sample;

        let (average_latency_ms, success_rate) = if sample.checks_performed == 0 {
            (0.0, "N/A".to_string())
        } else {
            let checks = sample.checks_performed as f64;
            let succeeded = (sample.checks_performed - sample.failed_checks) as f64;
            (
                sample.total_latency_ms as f64 / checks,
                format!("{:.2}%", succeeded / checks * 100.0),
            )
        };

        HealthMetrics {
            checks_performed: sample.checks_performed,
            failed_checks: sample.failed_checks,
            total_latency_ms: sample.total_latency_ms,
            last_latency_ms: sample.last_latency_ms,
            last_check_time: sample.last_check_time,
            is_healthy: sample.is_healthy,
            average_latency_ms,
            success_rate,
            status: self.inner.status_of(&state),
        }
    }

    /// Current overall status
    pub async fn status(&self) -> HealthStatus {
        let state = self.inner.state.read().await;
        self.inner.status_of(&state)
    }

    /// Recent check results, oldest first
    pub async fn history(&self) -> Vec<HealthCheckResult> {
        self.inner.state.read().await.history.iter().cloned().collect()
    }

    /// Zero all metrics and clear the history
    pub async fn reset_metrics(&self) {
        *self.inner.state.write().await = MonitorState::default();
        info!("Health metrics reset");
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.shutdown.cancel();
        }
    }
}

impl MonitorInner {
    async fn monitoring_loop(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.perform_check().await;
                }
            }
        }
        debug!("Health monitoring loop exited");
    }

    async fn perform_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, self.probe.ping()).await;
        let latency = started.elapsed();
        let latency_ms = latency.as_millis() as u64;

        let (healthy, details) = match outcome {
            Ok(Ok(details)) => (true, details),
            Ok(Err(e)) => {
                warn!(latency_ms, error_kind = e.kind(), "Health probe failed: {}", e);
                (
                    false,
                    json!({ "error": e.sanitized_message(), "kind": e.kind() }),
                )
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.probe_timeout.as_millis() as u64,
                    "Health probe timed out"
                );
                (
                    false,
                    json!({
                        "error": format!("probe timed out after {:?}", self.config.probe_timeout),
                        "kind": "timeout",
                    }),
                )
            }
        };

        if latency > self.config.latency_critical {
            error!(latency_ms, "Health probe latency critical");
        } else if latency > self.config.latency_warning {
            warn!(latency_ms, "Health probe latency high");
        }

        let result = HealthCheckResult {
            timestamp: Utc::now(),
            healthy,
            latency_ms,
            details,
        };

        let mut state = self.state.write().await;
        let sample = &mut state.sample;
        sample.checks_performed += 1;
        if !healthy {
            sample.failed_checks += 1;
        }
        sample.total_latency_ms += latency_ms;
        sample.last_latency_ms = Some(latency_ms);
        sample.last_check_time = Some(result.timestamp);
        sample.is_healthy = healthy;

        if self.config.max_history > 0 {
            state.history.push_back(result.clone());
            while state.history.len() > self.config.max_history {
                state.history.pop_front();
            }
        }

        debug!(healthy, latency_ms, "Health check completed");
        result
    }

    fn status_of(&self, state: &MonitorState) -> HealthStatus {
        let sample = &state.sample;
        match sample.last_latency_ms {
            None => HealthStatus::Unknown,
            Some(_) if !sample.is_healthy => HealthStatus::Unhealthy,
            Some(latency_ms)
                if Duration::from_millis(latency_ms) > self.config.latency_warning =>
            {
                HealthStatus::Degraded
            }
            Some(_) => HealthStatus::Healthy,
        }
    }
}
