//! resilience-status - drive a simulated flaky data store through the resilience layer
//! and print the resulting operator status report as JSON

use anyhow::Context;
use clap::Parser;
use datastore_resilience::{
    cache::WrapOptions,
    health::HealthProbe,
    logging::{init_logging, LogConfig},
    LayerConfig, ResilienceError, ResilienceLayer,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Resilience layer status demo
#[derive(Parser, Debug)]
#[command(name = "resilience-status")]
#[command(about = "Exercise the resilience layer against a simulated flaky data store")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RESILIENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of lookups to perform
    #[arg(short, long, default_value = "50")]
    rounds: u32,

    /// Probability that a simulated request fails
    #[arg(long, default_value = "0.3")]
    failure_rate: f64,

    /// Simulated request latency in milliseconds
    #[arg(long, default_value = "5")]
    latency_ms: u64,

    /// Distinct keys looked up, controls the cache hit rate
    #[arg(long, default_value = "8")]
    keys: u32,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Run a health probe every N rounds
    #[arg(long, default_value = "10")]
    probe_every: u32,
}

/// In-memory stand-in for a remote data store that fails at random
struct FlakyStore {
    failure_rate: f64,
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl FlakyStore {
    fn new(failure_rate: f64, latency: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            failure_rate: if failure_rate.is_finite() {
                failure_rate.clamp(0.0, 1.0)
            } else {
                0.0
            },
            latency,
            rng: Mutex::new(rng),
        }
    }

    async fn roundtrip(&self) -> datastore_resilience::Result<()> {
        tokio::time::sleep(self.latency).await;
        let fails = self.rng.lock().await.gen_bool(self.failure_rate);
        if fails {
            Err(ResilienceError::connection("simulated connection reset"))
        } else {
            Ok(())
        }
    }

    async fn fetch(&self, id: u32) -> datastore_resilience::Result<serde_json::Value> {
        self.roundtrip().await?;
        Ok(json!({ "id": id, "title": format!("Record {}", id) }))
    }
}

#[async_trait::async_trait]
impl HealthProbe for FlakyStore {
    async fn ping(&self) -> datastore_resilience::Result<serde_json::Value> {
        self.roundtrip().await?;
        Ok(json!({ "pong": true }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogConfig::from_env())?;

    let config = match &args.config {
        Some(path) => LayerConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LayerConfig::default(),
    }
    .with_env_overrides()?;

    let store = Arc::new(FlakyStore::new(
        args.failure_rate,
        Duration::from_millis(args.latency_ms),
        args.seed,
    ));
    let layer = ResilienceLayer::new(config, store.clone())?;
    info!(rounds = args.rounds, "Starting simulated workload");

    let lookup = layer.cache().wrap(
        "record",
        |id: u32| {
            let layer = &layer;
            let store = store.clone();
            async move { layer.execute("datastore", || store.fetch(id)).await }
        },
        WrapOptions::default(),
    );

    let probe_every = args.probe_every.max(1);
    let distinct_keys = args.keys.max(1);
    let mut failures = 0u32;
    for round in 0..args.rounds {
        if round % probe_every == 0 {
            layer.health().perform_check().await;
        }

        match lookup.call(round % distinct_keys).await {
            Ok(record) => debug!(round, %record, "Lookup succeeded"),
            Err(e) if e.is_circuit_open() => {
                failures += 1;
                debug!(round, "Lookup rejected: {}", e);
            }
            Err(e) => {
                failures += 1;
                warn!(round, error_kind = e.kind(), "Lookup failed: {}", e);
            }
        }
    }

    info!(
        rounds = args.rounds,
        failures, "Simulated workload finished"
    );

    let report = layer.status_report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    layer.shutdown().await;
    Ok(())
}
