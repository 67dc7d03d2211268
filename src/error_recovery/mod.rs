//! Error recovery patterns for calls into unreliable dependencies
//!
//! Circuit breakers fail fast while a dependency is down; the retry executor absorbs
//! short blips with exponential backoff.

pub mod circuit_breaker;
pub mod registry;
pub mod retry_policy;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerListener, CircuitBreakerStats,
    CircuitState, StateTransition,
};
pub use registry::CircuitBreakerRegistry;
pub use retry_policy::{
    retry, RetryBuilder, RetryCondition, RetryExecutor, RetryHook, RetryPolicy, RetryStats,
};
