//! Error types for the resilience layer
//!
//! Every failure that crosses this layer is a [`ResilienceError`]. The variants map onto
//! four classes: transient failures that are worth retrying, permanent failures that are
//! surfaced immediately, and the two conditions raised by the layer itself (an open
//! circuit and an exhausted retry deadline). Callers branch on [`ResilienceError::class`]
//! or the `is_*` helpers rather than on message text.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for resilience-layer operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors produced by protected operations and by the layer itself
#[derive(Error, Debug)]
pub enum ResilienceError {
    /// Connection reset, refused or dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// The operation's own timeout fired
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Downstream asked us to slow down (429-equivalent)
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Downstream temporarily unavailable (503-equivalent)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Status-coded failure reported by the downstream dependency
    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Input rejected by the dependency
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write conflicted with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller-defined error with an explicit retry decision
    #[error("{message}")]
    Domain { message: String, retryable: bool },

    /// Rejected by an open circuit breaker; the operation was never invoked
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen {
        name: String,
        retry_after: Option<Duration>,
    },

    /// The retry executor's overall deadline elapsed
    #[error("Retry deadline of {budget:?} exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { budget: Duration, attempts: u32 },

    /// Invalid configuration detected at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a failure for retry and breaker policy decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Likely to succeed if tried again
    Transient,
    /// Will fail again; surface immediately
    Permanent,
    /// Raised by a circuit breaker rejecting the call
    CircuitOpen,
    /// Raised by the retry executor when its overall budget ran out
    DeadlineExceeded,
}

impl ResilienceError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited<S: Into<String>>(msg: S) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Create a status-coded upstream error
    pub fn upstream<S: Into<String>>(status: u16, msg: S) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a caller-classified domain error
    pub fn domain<S: Into<String>>(msg: S, retryable: bool) -> Self {
        Self::Domain {
            message: msg.into(),
            retryable,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CircuitOpen { .. } => ErrorClass::CircuitOpen,
            Self::DeadlineExceeded { .. } => ErrorClass::DeadlineExceeded,
            Self::Connection(_)
            | Self::Timeout(_)
            | Self::RateLimited(_)
            | Self::ServiceUnavailable(_) => ErrorClass::Transient,
            Self::Upstream { status, .. } if matches!(status, 429 | 502 | 503 | 504) => {
                ErrorClass::Transient
            }
            Self::Domain {
                retryable: true, ..
            } => ErrorClass::Transient,
            Self::Io(err) if is_transient_io(err.kind()) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Default retry classifier: only transient failures are retried
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Check if this error was raised by an open circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error was raised by an exhausted retry deadline
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Upstream { .. } => "upstream",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Domain { .. } => "domain",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }

    /// Get a production-safe message that doesn't echo downstream payloads
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::Connection(_) => "Downstream connection issue".to_string(),
            Self::Timeout(_) => "Operation timed out".to_string(),
            Self::RateLimited(_) => "Rate limit exceeded".to_string(),
            Self::ServiceUnavailable(_) => "Service temporarily unavailable".to_string(),
            Self::Upstream { status, .. } => format!("Upstream error (status {status})"),
            Self::Validation(_) => "Invalid input provided".to_string(),
            Self::NotFound(_) => "Requested resource not found".to_string(),
            Self::Conflict(_) => "Conflicting update".to_string(),
            Self::Unauthorized(_) => "Access denied".to_string(),
            Self::Domain { .. } => "Operation failed".to_string(),
            // Layer-raised errors carry no downstream data
            Self::CircuitOpen { .. } | Self::DeadlineExceeded { .. } => self.to_string(),
            Self::Config(_) => "Configuration error".to_string(),
            Self::Serialization(_) => "Data serialization error".to_string(),
            Self::Io(_) => "I/O operation failed".to_string(),
        }
    }
}

fn is_transient_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
    )
}
