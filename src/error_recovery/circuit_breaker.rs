//! Circuit breaker pattern implementation for resilient error recovery
//!
//! A breaker guards one named dependency. It moves through three states:
//!
//! - `Closed`: calls pass through; consecutive failures and the failure rate of the
//!   current window are tracked
//! - `Open`: calls are rejected immediately until the open duration elapses
//! - `HalfOpen`: a bounded number of trial calls probe whether the dependency recovered
//!
//! The `Open -> HalfOpen` move is lazy. No timer fires at `next_attempt_time`; the next
//! call to [`CircuitBreaker::can_request`] or [`CircuitBreaker::execute`] performs it.
//!
//! Half-open trial slots are held by [`CircuitBreaker::execute`] only, and are returned
//! when the call finishes or its future is dropped. A slot that is still held after
//! `open_duration` is reclaimed.

use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - operations blocked
    Open,
    /// Circuit is half-open - testing if service recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Window failure rate (percent) that opens the circuit
    pub failure_rate_threshold: f64,
    /// Minimum window requests before the failure rate is considered
    pub volume_threshold: u32,
    /// How long the circuit stays open before allowing a trial request
    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,
    /// Trial requests allowed in flight while half-open
    pub half_open_max_requests: u32,
    /// Maximum retained state transitions
    pub max_transition_log: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            failure_rate_threshold: 50.0,
            volume_threshold: 10,
            open_duration: Duration::from_secs(60),
            half_open_max_requests: 3,
            max_transition_log: 100,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create configuration for critical services
    pub fn critical_service() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 5,
            failure_rate_threshold: 25.0,
            volume_threshold: 20,
            open_duration: Duration::from_secs(10),
            half_open_max_requests: 1,
            ..Self::default()
        }
    }

    /// Create configuration for non-critical services
    pub fn non_critical_service() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 2,
            failure_rate_threshold: 75.0,
            volume_threshold: 10,
            open_duration: Duration::from_secs(120),
            half_open_max_requests: 5,
            ..Self::default()
        }
    }

    /// Validate thresholds and durations
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::config(
                "circuit_breaker.failure_threshold must be at least 1",
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::config(
                "circuit_breaker.success_threshold must be at least 1",
            ));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(ResilienceError::config(format!(
                "circuit_breaker.failure_rate_threshold must be in (0, 100], got {}",
                self.failure_rate_threshold
            )));
        }
        if self.volume_threshold == 0 {
            return Err(ResilienceError::config(
                "circuit_breaker.volume_threshold must be at least 1",
            ));
        }
        if self.open_duration.is_zero() {
            return Err(ResilienceError::config(
                "circuit_breaker.open_duration must be greater than zero",
            ));
        }
        if self.half_open_max_requests == 0 {
            return Err(ResilienceError::config(
                "circuit_breaker.half_open_max_requests must be at least 1",
            ));
        }
        if self.max_transition_log == 0 {
            return Err(ResilienceError::config(
                "circuit_breaker.max_transition_log must be at least 1",
            ));
        }
        Ok(())
    }
}

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: CircuitState,
    /// New state
    pub to: CircuitState,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
    /// What caused it
    pub reason: String,
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Protected dependency
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Successful + failed + rejected requests
    pub total_requests: u64,
    /// Successful requests
    pub successful_requests: u64,
    /// Failed requests
    pub failed_requests: u64,
    /// Requests rejected without invoking the operation
    pub rejected_requests: u64,
    /// Failure percentage over all recorded outcomes
    pub failure_rate: f64,
    /// Failure percentage over the current closed window
    pub window_failure_rate: f64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub window_request_count: u32,
    pub window_failure_count: u32,
    /// Last failure time
    pub last_failure_time: Option<DateTime<Utc>>,
    /// When a half-open trial becomes possible (open state only)
    pub next_attempt_time: Option<DateTime<Utc>>,
    /// Times the circuit has opened
    pub circuit_open_count: u64,
    /// Transition log, oldest first
    pub transitions: Vec<StateTransition>,
}

/// Observer notified of every state transition
#[async_trait::async_trait]
pub trait CircuitBreakerListener: Send + Sync {
    /// Called after a transition, outside the breaker's lock
    async fn on_transition(&self, breaker: &str, transition: &StateTransition);
}

/// Internal circuit breaker state
#[derive(Debug)]
struct CircuitBreakerState {
    current_state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    window_request_count: u32,
    window_failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<Instant>,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
    circuit_open_count: u64,
    transitions: VecDeque<StateTransition>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            current_state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            window_request_count: 0,
            window_failure_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
            circuit_open_count: 0,
            transitions: VecDeque::new(),
        }
    }

    fn window_failure_rate(&self) -> f64 {
        if self.window_request_count == 0 {
            0.0
        } else {
            self.window_failure_count as f64 / self.window_request_count as f64 * 100.0
        }
    }
}

/// Outstanding half-open trial reservations
#[derive(Debug, Default)]
struct TrialSlots {
    next_id: u64,
    reserved: Vec<(u64, Instant)>,
}

impl TrialSlots {
    /// Drop reservations older than `lease`, returning how many were reclaimed
    fn reclaim_stale(&mut self, now: Instant, lease: Duration) -> usize {
        let before = self.reserved.len();
        self.reserved
            .retain(|(_, reserved_at)| now.saturating_duration_since(*reserved_at) < lease);
        before - self.reserved.len()
    }

    fn reserve(&mut self, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.reserved.push((id, now));
        id
    }

    fn release(&mut self, id: u64) {
        self.reserved.retain(|(reserved, _)| *reserved != id);
    }
}

/// Half-open trial slot held for the duration of one `execute` call
struct TrialPermit<'a> {
    slots: &'a Mutex<TrialSlots>,
    id: u64,
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(self.id);
    }
}

/// Circuit breaker protecting one named dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitBreakerState>,
    trials: Mutex<TrialSlots>,
    listeners: RwLock<Vec<Arc<dyn CircuitBreakerListener>>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker, validating its configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitBreakerState::new()),
            trials: Mutex::new(TrialSlots::default()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Name of the protected dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration this breaker was created with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, without performing the lazy open -> half-open check
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.current_state
    }

    /// Check whether a request may proceed
    ///
    /// Performs the lazy `Open -> HalfOpen` transition as a side effect. It reserves
    /// nothing and counts no rejection; while half-open it answers whether a trial slot
    /// is currently free.
    pub async fn can_request(&self) -> bool {
        self.admit(false).await.is_ok()
    }

    /// Execute an operation under circuit breaker protection
    ///
    /// Fails with [`ResilienceError::CircuitOpen`] without invoking the operation when the
    /// circuit rejects the call. Otherwise the outcome is recorded and returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = match self.admit(true).await {
            Ok(slot) => slot.map(|id| TrialPermit {
                slots: &self.trials,
                id,
            }),
            Err(retry_after) => {
                return Err(ResilienceError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after,
                });
            }
        };

        let result = match operation().await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(error) => {
                debug!(
                    dependency = %self.name,
                    error_kind = error.kind(),
                    "Protected operation failed: {}",
                    error
                );
                self.record_failure().await;
                Err(error)
            }
        };
        // The trial slot stays held until the outcome is recorded
        drop(permit);
        result
    }

    /// Record successful operation
    pub async fn record_success(&self) {
        let mut fired = Vec::new();
        {
            let mut state = self.state.write().await;
            state.successful_requests += 1;

            match state.current_state {
                CircuitState::Closed => {
                    state.consecutive_failures = 0;
                    state.consecutive_successes += 1;
                    state.window_request_count += 1;
                    self.trip_on_failure_rate(&mut state, &mut fired);
                }
                CircuitState::HalfOpen => {
                    state.consecutive_failures = 0;
                    state.consecutive_successes += 1;
                    state.window_request_count += 1;
                    if state.consecutive_successes >= self.config.success_threshold {
                        let reason = format!(
                            "{} consecutive successful trial requests",
                            state.consecutive_successes
                        );
                        self.transition(&mut state, CircuitState::Closed, reason, &mut fired);
                    }
                }
                CircuitState::Open => {
                    // Late outcome of a request admitted before the circuit opened
                    debug!(dependency = %self.name, "Success recorded while circuit is open");
                }
            }
        }
        self.notify(fired).await;
    }

    /// Record failed operation
    pub async fn record_failure(&self) {
        let mut fired = Vec::new();
        {
            let mut state = self.state.write().await;
            state.failed_requests += 1;
            state.last_failure_time = Some(Utc::now());

            match state.current_state {
                CircuitState::Closed => {
                    state.consecutive_failures += 1;
                    state.consecutive_successes = 0;
                    state.window_request_count += 1;
                    state.window_failure_count += 1;

                    if state.consecutive_failures >= self.config.failure_threshold {
                        let reason =
                            format!("{} consecutive failures", state.consecutive_failures);
                        self.transition(&mut state, CircuitState::Open, reason, &mut fired);
                    } else {
                        self.trip_on_failure_rate(&mut state, &mut fired);
                    }
                }
                CircuitState::HalfOpen => {
                    // Single failure in half-open state reopens the circuit
                    state.consecutive_failures += 1;
                    state.consecutive_successes = 0;
                    self.transition(
                        &mut state,
                        CircuitState::Open,
                        "failure during half-open trial".to_string(),
                        &mut fired,
                    );
                }
                CircuitState::Open => {
                    debug!(dependency = %self.name, "Failure recorded while circuit is open");
                }
            }
        }
        self.notify(fired).await;
    }

    /// Get current statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.read().await;
        let outcomes = state.successful_requests + state.failed_requests;
        let failure_rate = if outcomes == 0 {
            0.0
        } else {
            state.failed_requests as f64 / outcomes as f64 * 100.0
        };
        let next_attempt_time = state.next_attempt_time.and_then(|at| {
            let remaining = at.saturating_duration_since(Instant::now());
            chrono::Duration::from_std(remaining)
                .ok()
                .map(|d| Utc::now() + d)
        });

        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.current_state,
            total_requests: outcomes + state.rejected_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            rejected_requests: state.rejected_requests,
            failure_rate,
            window_failure_rate: state.window_failure_rate(),
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            window_request_count: state.window_request_count,
            window_failure_count: state.window_failure_count,
            last_failure_time: state.last_failure_time,
            next_attempt_time,
            circuit_open_count: state.circuit_open_count,
            transitions: state.transitions.iter().cloned().collect(),
        }
    }

    /// Force the circuit closed and zero every counter
    ///
    /// The transition log is kept and records the manual reset.
    pub async fn reset(&self) {
        let mut fired = Vec::new();
        {
            let mut state = self.state.write().await;
            let transitions = std::mem::take(&mut state.transitions);
            let previous = state.current_state;
            *state = CircuitBreakerState::new();
            state.current_state = previous;
            state.transitions = transitions;
            self.transition(
                &mut state,
                CircuitState::Closed,
                "manual reset".to_string(),
                &mut fired,
            );
        }
        info!(dependency = %self.name, "Circuit breaker reset to closed state");
        self.notify(fired).await;
    }

    /// Add transition listener
    pub async fn add_listener(&self, listener: Arc<dyn CircuitBreakerListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Open the circuit once a full window fails too often
    fn trip_on_failure_rate(
        &self,
        state: &mut CircuitBreakerState,
        fired: &mut Vec<StateTransition>,
    ) {
        if state.window_request_count >= self.config.volume_threshold
            && state.window_failure_rate() >= self.config.failure_rate_threshold
        {
            let reason = format!(
                "failure rate {:.2}% over {} requests",
                state.window_failure_rate(),
                state.window_request_count
            );
            self.transition(state, CircuitState::Open, reason, fired);
        }
    }

    fn lock_trials(&self) -> MutexGuard<'_, TrialSlots> {
        self.trials.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit or reject one request, returning the remaining open time on rejection
    ///
    /// With `reserve` set the call is a real request: a half-open admission returns the
    /// id of the reserved trial slot and a rejection is counted.
    async fn admit(&self, reserve: bool) -> std::result::Result<Option<u64>, Option<Duration>> {
        let mut fired = Vec::new();
        let outcome = {
            let mut state = self.state.write().await;
            let now = Instant::now();

            if state.current_state == CircuitState::Open {
                match state.next_attempt_time {
                    Some(next_attempt) if now < next_attempt => {
                        if reserve {
                            state.rejected_requests += 1;
                            debug!(dependency = %self.name, "Circuit breaker open, blocking request");
                        }
                        return Err(Some(next_attempt - now));
                    }
                    _ => self.transition(
                        &mut state,
                        CircuitState::HalfOpen,
                        "open duration elapsed".to_string(),
                        &mut fired,
                    ),
                }
            }

            match state.current_state {
                CircuitState::HalfOpen => {
                    let mut trials = self.lock_trials();
                    let reclaimed = trials.reclaim_stale(now, self.config.open_duration);
                    if reclaimed > 0 {
                        warn!(
                            dependency = %self.name,
                            reclaimed,
                            "Reclaimed half-open trial slots that never reported an outcome"
                        );
                    }

                    if trials.reserved.len() < self.config.half_open_max_requests as usize {
                        if reserve {
                            debug!(dependency = %self.name, "Circuit breaker half-open, allowing trial request");
                            Ok(Some(trials.reserve(now)))
                        } else {
                            Ok(None)
                        }
                    } else {
                        if reserve {
                            state.rejected_requests += 1;
                            debug!(dependency = %self.name, "Half-open trial limit reached, blocking request");
                        }
                        Err(None)
                    }
                }
                _ => Ok(None),
            }
        };
        self.notify(fired).await;
        outcome
    }

    /// Transition to new state, resetting the counters the target state owns
    fn transition(
        &self,
        state: &mut CircuitBreakerState,
        new_state: CircuitState,
        reason: String,
        fired: &mut Vec<StateTransition>,
    ) {
        let old_state = state.current_state;
        state.current_state = new_state;
        self.lock_trials().reserved.clear();

        match new_state {
            CircuitState::Open => {
                state.next_attempt_time = Some(Instant::now() + self.config.open_duration);
                state.circuit_open_count += 1;
                warn!(
                    dependency = %self.name,
                    open_for_ms = self.config.open_duration.as_millis() as u64,
                    "Circuit breaker opened: {}",
                    reason
                );
            }
            CircuitState::HalfOpen => {
                state.next_attempt_time = None;
                state.consecutive_successes = 0;
                info!(dependency = %self.name, "Circuit breaker transitioning to half-open");
            }
            CircuitState::Closed => {
                state.next_attempt_time = None;
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                state.window_request_count = 0;
                state.window_failure_count = 0;
                info!(dependency = %self.name, "Circuit breaker closed: {}", reason);
            }
        }

        let transition = StateTransition {
            from: old_state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        };
        state.transitions.push_back(transition.clone());
        while state.transitions.len() > self.config.max_transition_log {
            state.transitions.pop_front();
        }
        fired.push(transition);
    }

    async fn notify(&self, fired: Vec<StateTransition>) {
        if fired.is_empty() {
            return;
        }
        let listeners = self.listeners.read().await.clone();
        for transition in &fired {
            for listener in &listeners {
                listener.on_transition(&self.name, transition).await;
            }
        }
    }
}
