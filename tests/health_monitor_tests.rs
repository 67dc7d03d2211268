//! Health monitor aggregation, timeouts and monitoring lifecycle

mod common;

use async_trait::async_trait;
use common::LatencyProbe;
use datastore_resilience::health::{HealthConfig, HealthMonitor, HealthProbe, HealthStatus};
use datastore_resilience::{ResilienceError, Result};
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub DataStore {}

    #[async_trait]
    impl HealthProbe for DataStore {
        async fn ping(&self) -> Result<serde_json::Value>;
    }
}

#[tokio::test(start_paused = true)]
async fn test_latency_aggregation() {
    let monitor = HealthMonitor::new(
        Arc::new(LatencyProbe::new(&[10, 20, 30])),
        HealthConfig::default(),
    )
    .unwrap();

    for expected in [10, 20, 30] {
        let result = monitor.perform_check().await;
        assert!(result.healthy);
        assert_eq!(result.latency_ms, expected);
    }

    let metrics = monitor.metrics().await;
    assert_eq!(metrics.checks_performed, 3);
    assert_eq!(metrics.failed_checks, 0);
    assert_eq!(metrics.average_latency_ms, 20.0);
    assert_eq!(metrics.success_rate, "100.00%");
    assert_eq!(metrics.last_latency_ms, Some(30));
    assert!(metrics.is_healthy);
    assert_eq!(metrics.status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_degrades_but_does_not_fail() {
    let config = HealthConfig {
        latency_warning: Duration::from_millis(50),
        latency_critical: Duration::from_millis(200),
        ..Default::default()
    };
    let monitor = HealthMonitor::new(Arc::new(LatencyProbe::new(&[300])), config).unwrap();

    let result = monitor.perform_check().await;

    assert!(result.healthy);
    assert_eq!(monitor.metrics().await.failed_checks, 0);
    assert_eq!(monitor.status().await, HealthStatus::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_probe_timeout_counts_as_failure() {
    let config = HealthConfig {
        probe_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let monitor = HealthMonitor::new(Arc::new(LatencyProbe::new(&[5_000])), config).unwrap();

    let result = monitor.perform_check().await;

    assert!(!result.healthy);
    assert_eq!(result.latency_ms, 100);
    assert_eq!(result.details["kind"], "timeout");
    assert_eq!(monitor.status().await, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_probe_errors_are_sanitized_in_details() {
    let mut store = MockDataStore::new();
    store
        .expect_ping()
        .times(1)
        .returning(|| Err(ResilienceError::unauthorized("token abc123 rejected")));
    let monitor = HealthMonitor::new(Arc::new(store), HealthConfig::default()).unwrap();

    let result = monitor.perform_check().await;

    assert!(!result.healthy);
    assert_eq!(result.details["kind"], "unauthorized");
    assert!(!result.details["error"]
        .as_str()
        .unwrap()
        .contains("abc123"));
}

#[tokio::test]
async fn test_success_rate_and_reset() {
    let mut store = MockDataStore::new();
    let mut sequence = mockall::Sequence::new();
    for healthy in [true, false, true, true] {
        store
            .expect_ping()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(move || {
                if healthy {
                    Ok(json!({ "version": "15.2" }))
                } else {
                    Err(ResilienceError::service_unavailable("replica lagging"))
                }
            });
    }
    let monitor = HealthMonitor::new(Arc::new(store), HealthConfig::default()).unwrap();

    for _ in 0..4 {
        monitor.perform_check().await;
    }

    let metrics = monitor.metrics().await;
    assert_eq!(metrics.checks_performed, 4);
    assert_eq!(metrics.failed_checks, 1);
    assert_eq!(metrics.success_rate, "75.00%");
    assert_eq!(monitor.history().await.len(), 4);
    assert_eq!(monitor.history().await[0].details["version"], "15.2");

    monitor.reset_metrics().await;
    let metrics = monitor.metrics().await;
    assert_eq!(metrics.checks_performed, 0);
    assert_eq!(metrics.success_rate, "N/A");
    assert_eq!(metrics.status, HealthStatus::Unknown);
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_runs_on_interval() {
    let mut store = MockDataStore::new();
    store.expect_ping().times(5).returning(|| Ok(json!({})));
    let monitor = HealthMonitor::new(Arc::new(store), HealthConfig::default()).unwrap();

    monitor
        .start_monitoring(Duration::from_secs(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(55)).await;
    monitor.stop_monitoring().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(monitor.metrics().await.checks_performed, 5);
}

#[tokio::test]
async fn test_zero_interval_rejected() {
    let monitor =
        HealthMonitor::new(Arc::new(MockDataStore::new()), HealthConfig::default()).unwrap();

    let error = monitor.start_monitoring(Duration::ZERO).await.unwrap_err();
    assert!(matches!(error, ResilienceError::Config(_)));
    assert!(!monitor.is_monitoring().await);
}
