//! Circuit breaker state machine and registry behaviour

mod common;

use common::{FlakyStore, Step};
use datastore_resilience::error_recovery::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
use datastore_resilience::ResilienceError;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
    CircuitBreaker::new("inventory-db", config).unwrap()
}

#[tokio::test]
async fn test_consecutive_failures_trip_the_circuit() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 3,
        ..Default::default()
    });
    let store = FlakyStore::always(Step::Transient);

    for _ in 0..3 {
        let result = breaker.execute(|| store.fetch(1)).await;
        assert!(matches!(result, Err(ResilienceError::Connection(_))));
    }
    assert_eq!(breaker.state().await, CircuitState::Open);

    let rejected = breaker.execute(|| store.fetch(1)).await;
    assert!(rejected.unwrap_err().is_circuit_open());
    assert_eq!(store.calls(), 3);

    let stats = breaker.stats().await;
    assert_eq!(stats.failed_requests, 3);
    assert_eq!(stats.rejected_requests, 1);
    assert_eq!(stats.total_requests, 4);
    assert!(stats.next_attempt_time.is_some());
    assert_eq!(stats.circuit_open_count, 1);
}

#[tokio::test]
async fn test_success_resets_consecutive_failures() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 3,
        ..Default::default()
    });

    breaker.record_failure().await;
    breaker.record_failure().await;
    breaker.record_success().await;
    breaker.record_failure().await;
    breaker.record_failure().await;

    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_eq!(breaker.stats().await.consecutive_failures, 2);
}

#[tokio::test]
async fn test_failure_rate_trips_the_circuit() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 100,
        volume_threshold: 10,
        failure_rate_threshold: 50.0,
        ..Default::default()
    });

    // Alternate success and failure: 50% over the window
    for i in 0..9 {
        if i % 2 == 0 {
            breaker.record_success().await;
        } else {
            breaker.record_failure().await;
        }
    }
    // 9 requests, below the volume threshold
    assert_eq!(breaker.state().await, CircuitState::Closed);

    breaker.record_failure().await;

    let stats = breaker.stats().await;
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.window_request_count, 10);
    assert_eq!(stats.window_failure_count, 5);
    assert!(stats
        .transitions
        .last()
        .unwrap()
        .reason
        .starts_with("failure rate"));
}

#[tokio::test]
async fn test_failure_rate_trips_when_a_success_completes_the_window() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 5,
        volume_threshold: 10,
        failure_rate_threshold: 50.0,
        ..Default::default()
    });

    // 6 failures interleaved with successes, never 5 in a row
    let outcomes = [false, false, true, false, false, true, false, false, true];
    for ok in outcomes {
        if ok {
            breaker.record_success().await;
        } else {
            breaker.record_failure().await;
        }
    }
    assert_eq!(breaker.state().await, CircuitState::Closed);

    // The 10th request is a success and reaches the volume threshold at 60%
    breaker.record_success().await;

    let stats = breaker.stats().await;
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.window_request_count, 10);
    assert_eq!(stats.window_failure_count, 6);
}

#[tokio::test]
async fn test_low_failure_rate_keeps_circuit_closed() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 100,
        volume_threshold: 10,
        failure_rate_threshold: 50.0,
        ..Default::default()
    });

    for i in 0..20 {
        if i % 4 == 0 {
            breaker.record_failure().await;
        } else {
            breaker.record_success().await;
        }
    }

    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_recovery() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 2,
        success_threshold: 2,
        open_duration: Duration::from_secs(30),
        ..Default::default()
    });
    breaker.record_failure().await;
    breaker.record_failure().await;
    assert!(!breaker.can_request().await);

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(!breaker.can_request().await);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(breaker.can_request().await);
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    assert!(breaker.can_request().await);
    breaker.record_success().await;

    let stats = breaker.stats().await;
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.window_request_count, 0);
    assert_eq!(stats.window_failure_count, 0);
    assert!(stats.next_attempt_time.is_none());

    let path: Vec<_> = stats.transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        path,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_half_open_relapse_restarts_open_timer() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        open_duration: Duration::from_secs(10),
        ..Default::default()
    });
    breaker.record_failure().await;

    tokio::time::advance(Duration::from_secs(10)).await;
    let store = FlakyStore::always(Step::Transient);
    let result = breaker.execute(|| store.fetch(7)).await;
    assert!(matches!(result, Err(ResilienceError::Connection(_))));
    assert_eq!(breaker.state().await, CircuitState::Open);

    // The open period starts over from the relapse
    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(!breaker.can_request().await);
    let rejected = breaker.execute(|| store.fetch(7)).await;
    assert!(rejected.unwrap_err().is_circuit_open());
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(breaker.can_request().await);

    let stats = breaker.stats().await;
    assert_eq!(stats.circuit_open_count, 2);
    assert_eq!(stats.rejected_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_queries_do_not_consume_trial_slots() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        half_open_max_requests: 2,
        open_duration: Duration::from_secs(5),
        ..Default::default()
    });
    breaker.record_failure().await;
    tokio::time::advance(Duration::from_secs(5)).await;

    for _ in 0..3 {
        assert!(breaker.can_request().await);
    }
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    let store = FlakyStore::always(Step::Ok);
    assert!(breaker.execute(|| store.fetch(1)).await.is_ok());
    assert_eq!(breaker.stats().await.rejected_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_trial_returns_its_slot() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        success_threshold: 1,
        half_open_max_requests: 1,
        open_duration: Duration::from_secs(5),
        ..Default::default()
    });
    breaker.record_failure().await;
    tokio::time::advance(Duration::from_secs(5)).await;

    let stuck = tokio::time::timeout(
        Duration::from_millis(10),
        breaker.execute(|| async {
            std::future::pending::<()>().await;
            Ok::<(), ResilienceError>(())
        }),
    )
    .await;
    assert!(stuck.is_err());

    let store = FlakyStore::always(Step::Ok);
    assert!(breaker.execute(|| store.fetch(1)).await.is_ok());
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_open_error_carries_retry_after() {
    let breaker = breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        open_duration: Duration::from_secs(60),
        ..Default::default()
    });
    breaker.record_failure().await;

    match breaker.execute(|| async { Ok(()) }).await {
        Err(ResilienceError::CircuitOpen { name, retry_after }) => {
            assert_eq!(name, "inventory-db");
            let retry_after = retry_after.unwrap();
            assert!(retry_after <= Duration::from_secs(60));
            assert!(retry_after > Duration::from_secs(50));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_recording_is_consistent() {
    let breaker = Arc::new(breaker(CircuitBreakerConfig {
        failure_threshold: 1_000,
        volume_threshold: 1_000,
        ..Default::default()
    }));

    let tasks = (0..200).map(|i| {
        let breaker = breaker.clone();
        tokio::spawn(async move {
            if i % 2 == 0 {
                breaker.record_success().await;
            } else {
                breaker.record_failure().await;
            }
        })
    });
    futures::future::join_all(tasks).await;

    let stats = breaker.stats().await;
    assert_eq!(stats.total_requests, 200);
    assert_eq!(stats.successful_requests, 100);
    assert_eq!(stats.failed_requests, 100);
    assert_eq!(stats.window_request_count, 200);
}

#[tokio::test]
async fn test_registry_applies_config_only_at_creation() {
    let registry = CircuitBreakerRegistry::default();
    let strict = CircuitBreakerConfig {
        failure_threshold: 1,
        ..Default::default()
    };
    let lenient = CircuitBreakerConfig {
        failure_threshold: 50,
        ..Default::default()
    };

    let first = registry.get_breaker("payments", Some(strict)).await.unwrap();
    let second = registry
        .get_breaker("payments", Some(lenient))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.config().failure_threshold, 1);

    second.record_failure().await;
    assert_eq!(first.state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_registry_default_config_and_stats() {
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 2,
        ..Default::default()
    })
    .unwrap();

    let search = registry.get_breaker("search", None).await.unwrap();
    registry.get_breaker("accounts", None).await.unwrap();
    search.record_failure().await;
    search.record_failure().await;

    assert_eq!(registry.names().await, vec!["accounts", "search"]);
    let stats = registry.get_all_stats().await;
    assert_eq!(stats["search"].state, CircuitState::Open);
    assert_eq!(stats["accounts"].state, CircuitState::Closed);

    registry.reset_all().await;
    assert_eq!(search.state().await, CircuitState::Closed);
}
