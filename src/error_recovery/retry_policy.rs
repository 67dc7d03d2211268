//! Retry policy implementation with exponential backoff and jitter
//!
//! A [`RetryPolicy`] describes how often and how patiently an operation is retried;
//! a [`RetryExecutor`] applies it and keeps cumulative [`RetryStats`].

use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Predicate deciding whether a failed attempt may be retried
pub type RetryCondition = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Hook invoked before each backoff wait with `(error, attempt, delay)`
///
/// An `Err` returned by the hook is logged and otherwise ignored.
pub type RetryHook = Arc<dyn Fn(&ResilienceError, u32, Duration) -> Result<()> + Send + Sync>;

/// Retry policy configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for a single backoff wait (before jitter)
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
    /// Add up to 50% random extra delay
    pub jitter: bool,
    /// Budget for the whole retry loop, backoff waits included
    #[serde(with = "humantime_serde")]
    pub overall_timeout: Option<Duration>,
    /// Overrides the default transient-error classification
    #[serde(skip)]
    pub retry_condition: Option<RetryCondition>,
    /// Observer called before each retry
    #[serde(skip)]
    pub on_retry: Option<RetryHook>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("overall_timeout", &self.overall_timeout)
            .field(
                "retry_condition",
                &self.retry_condition.as_ref().map(|_| "<function>"),
            )
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<function>"))
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            overall_timeout: None,
            retry_condition: None,
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy for critical operations (fewer retries, shorter delays)
    pub fn critical() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            overall_timeout: Some(Duration::from_secs(10)),
            ..Self::default()
        }
    }

    /// Create a policy for data store round trips
    pub fn database() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            overall_timeout: Some(Duration::from_secs(30)),
            ..Self::default()
        }
    }

    /// Create a policy for background operations (more retries, longer delays)
    pub fn background() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 3.0,
            ..Self::default()
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Validate delays and multiplier
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ResilienceError::config(format!(
                "retry.backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(ResilienceError::config(format!(
                "retry.base_delay ({:?}) must not exceed retry.max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        if matches!(self.overall_timeout, Some(budget) if budget.is_zero()) {
            return Err(ResilienceError::config(
                "retry.overall_timeout must be greater than zero when set",
            ));
        }
        Ok(())
    }

    /// Backoff delay before retry number `attempt` (1-based), capped, without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }

    /// Calculate delay for given attempt, jitter included
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for(attempt);
        if self.jitter {
            let extra = rand::thread_rng().gen_range(0.0..=0.5);
            capped + capped.mul_f64(extra)
        } else {
            capped
        }
    }

    /// Check if error should be retried
    pub fn should_retry(&self, error: &ResilienceError) -> bool {
        match &self.retry_condition {
            Some(condition) => condition(error),
            None => error.is_retryable(),
        }
    }
}

/// Retry statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Total operations attempted
    pub total_operations: u64,
    /// Successful operations (no retry needed)
    pub successful_first_attempt: u64,
    /// Successful operations (after retry)
    pub successful_after_retry: u64,
    /// Failed operations (all retries exhausted)
    pub failed_after_retries: u64,
    /// Failed operations rejected by the retry condition
    pub non_retryable_failures: u64,
    /// Operations that ran out of their overall budget
    pub deadline_failures: u64,
    /// Total retry attempts
    pub total_retry_attempts: u64,
    /// Average retries per operation
    pub average_retries: f64,
    /// Last retry timestamp
    pub last_retry: Option<DateTime<Utc>>,
}

/// Retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: Arc<RwLock<RetryStats>>,
}

impl RetryExecutor {
    /// Create new retry executor
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            stats: Arc::new(RwLock::new(RetryStats::default())),
        })
    }

    /// Policy applied by this executor
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute operation with retry policy
    ///
    /// Returns the first success, or the last error once retries are exhausted or the
    /// retry condition rejects it. With an overall timeout, running out of budget yields
    /// [`ResilienceError::DeadlineExceeded`].
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.write().await.total_operations += 1;

        let deadline = self
            .policy
            .overall_timeout
            .map(|budget| (budget, Instant::now() + budget));
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = match deadline {
                Some((budget, deadline)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(self.deadline_exceeded(budget, attempt - 1).await);
                    }
                    match tokio::time::timeout(remaining, operation()).await {
                        Ok(outcome) => outcome,
                        Err(_) => return Err(self.deadline_exceeded(budget, attempt).await),
                    }
                }
                None => operation().await,
            };

            let error = match outcome {
                Ok(result) => {
                    let mut stats = self.stats.write().await;
                    if attempt == 1 {
                        stats.successful_first_attempt += 1;
                    } else {
                        stats.successful_after_retry += 1;
                    }
                    drop(stats);

                    if attempt > 1 {
                        info!(attempt, "Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            if attempt > self.policy.max_retries {
                self.stats.write().await.failed_after_retries += 1;
                if self.policy.max_retries > 0 {
                    warn!(attempt, "Operation failed after {} attempts: {}", attempt, error);
                }
                return Err(error);
            }

            if !self.policy.should_retry(&error) {
                self.stats.write().await.non_retryable_failures += 1;
                debug!(attempt, error_kind = error.kind(), "Error not retryable: {}", error);
                return Err(error);
            }

            let delay = self.policy.calculate_delay(attempt);
            if let Some((budget, deadline)) = deadline {
                if Instant::now() + delay >= deadline {
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Backoff would outlast the overall timeout"
                    );
                    return Err(self.deadline_exceeded(budget, attempt).await);
                }
            }

            if let Some(hook) = &self.policy.on_retry {
                if let Err(hook_error) = hook(&error, attempt, delay) {
                    warn!(attempt, "Retry hook failed: {}", hook_error);
                }
            }

            {
                let mut stats = self.stats.write().await;
                stats.total_retry_attempts += 1;
                stats.last_retry = Some(Utc::now());
            }

            debug!(
                attempt,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Retrying after error: {}",
                error
            );

            sleep(delay).await;
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        let mut stats = self.stats.read().await.clone();
        stats.average_retries = if stats.total_operations == 0 {
            0.0
        } else {
            stats.total_retry_attempts as f64 / stats.total_operations as f64
        };
        stats
    }

    /// Reset statistics
    pub async fn reset_stats(&self) {
        *self.stats.write().await = RetryStats::default();
    }

    async fn deadline_exceeded(&self, budget: Duration, attempts: u32) -> ResilienceError {
        self.stats.write().await.deadline_failures += 1;
        warn!(
            attempts,
            budget_ms = budget.as_millis() as u64,
            "Retry budget exhausted"
        );
        ResilienceError::DeadlineExceeded { budget, attempts }
    }
}

/// Run `operation` once under `policy` with a throwaway executor
pub async fn retry<F, T, Fut>(policy: RetryPolicy, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(policy)?.execute(operation).await
}

/// Retry builder for fluent API
#[derive(Debug, Default)]
pub struct RetryBuilder {
    policy: RetryPolicy,
}

impl RetryBuilder {
    /// Create new retry builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set additional attempts after the first
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    /// Set initial delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    /// Set delay cap
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter = enabled;
        self
    }

    /// Bound the whole retry loop
    pub fn overall_timeout(mut self, budget: Duration) -> Self {
        self.policy.overall_timeout = Some(budget);
        self
    }

    /// Replace the transient-error classifier
    pub fn retry_if<C>(mut self, condition: C) -> Self
    where
        C: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.policy.retry_condition = Some(Arc::new(condition));
        self
    }

    /// Observe each retry
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(&ResilienceError, u32, Duration) -> Result<()> + Send + Sync + 'static,
    {
        self.policy.on_retry = Some(Arc::new(hook));
        self
    }

    /// Finish with the policy only
    pub fn policy(self) -> RetryPolicy {
        self.policy
    }

    /// Build retry executor
    pub fn build(self) -> Result<RetryExecutor> {
        RetryExecutor::new(self.policy)
    }
}
