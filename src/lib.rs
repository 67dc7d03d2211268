//! Resilience and caching layer for calls into an unreliable data store
//!
//! The crate provides four cooperating pieces:
//!
//! - [`error_recovery::CircuitBreaker`] per named dependency, created on demand by
//!   [`error_recovery::CircuitBreakerRegistry`]
//! - [`error_recovery::RetryExecutor`] with exponential backoff, jitter and an optional
//!   overall deadline
//! - [`cache::ResponseCache`], a TTL + LRU cache with glob invalidation and memoization
//! - [`health::HealthMonitor`], a periodic probe with latency and success metrics
//!
//! [`ResilienceLayer`] wires one of each together for a process. All state is local to
//! the process; nothing is coordinated across nodes.

pub mod cache;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod health;
pub mod layer;
pub mod logging;

// Re-export main types for convenience
pub use config::LayerConfig;
pub use error::{ErrorClass, ResilienceError, Result};
pub use layer::{ResilienceLayer, StatusReport};

/// Commonly used types
pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheStats, ResponseCache, WrapOptions};
    pub use crate::error::{ErrorClass, ResilienceError, Result};
    pub use crate::error_recovery::{
        retry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
        RetryExecutor, RetryPolicy,
    };
    pub use crate::health::{HealthConfig, HealthMonitor, HealthProbe, HealthStatus};
    pub use crate::{LayerConfig, ResilienceLayer};
}
