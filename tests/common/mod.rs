//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use datastore_resilience::health::HealthProbe;
use datastore_resilience::{ResilienceError, Result};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Outcome of one scripted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ok,
    Transient,
    Permanent,
}

/// Data store double that replays a script of outcomes, then keeps repeating the last one
pub struct FlakyStore {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Self {
        let script: VecDeque<Step> = script.into_iter().collect();
        let fallback = script.back().copied().unwrap_or(Step::Ok);
        Self {
            script: Mutex::new(script),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new([step])
    }

    /// Fails transiently `n` times, then succeeds
    pub fn failing_times(n: usize) -> Self {
        Self::new(
            std::iter::repeat(Step::Transient)
                .take(n)
                .chain(std::iter::once(Step::Ok)),
        )
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn fetch(&self, id: u32) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match step {
            Step::Ok => Ok(json!({ "id": id })),
            Step::Transient => Err(ResilienceError::connection("connection reset by peer")),
            Step::Permanent => Err(ResilienceError::validation("malformed record id")),
        }
    }
}

/// Probe whose successive pings take the given latencies
pub struct LatencyProbe {
    latencies: Mutex<VecDeque<Duration>>,
}

impl LatencyProbe {
    pub fn new(latencies_ms: &[u64]) -> Self {
        Self {
            latencies: Mutex::new(
                latencies_ms
                    .iter()
                    .map(|ms| Duration::from_millis(*ms))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl HealthProbe for LatencyProbe {
    async fn ping(&self) -> Result<serde_json::Value> {
        let latency = self.latencies.lock().unwrap().pop_front().unwrap_or_default();
        tokio::time::sleep(latency).await;
        Ok(json!({ "pong": true }))
    }
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("datastore_resilience=debug")
        .with_test_writer()
        .try_init();
}
