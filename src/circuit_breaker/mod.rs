//! Circuit Breaker for remote price operations
//!
//! Guards a single logical remote operation (e.g. "metal-price-api") and
//! short-circuits calls when:
//! - Lifetime failures since the last reset reach `failure_threshold`
//! - The rolling failure rate over `monitoring_period` is at least 50%
//!   with 10 or more samples in the window
//!
//! After opening, the breaker rejects calls until `reset_timeout` has
//! elapsed, then admits calls in half-open state. A success while
//! half-open closes the breaker again.

pub mod factory;

pub use factory::CircuitBreakerFactory;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::metrics::MetricsState;

/// Minimum samples in the monitoring window before the failure rate counts
const MIN_WINDOW_SAMPLES: usize = 10;

/// Failure rate at which the breaker opens
const FAILURE_RATE_THRESHOLD: f64 = 0.5;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls are admitted
    Closed,
    /// Calls are rejected until the reset timeout elapses
    Open,
    /// Probing whether the dependency has recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Immutable per-instance thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    /// Failures (since last reset) that open the breaker
    pub failure_threshold: u32,
    /// Cooldown before the open breaker admits a trial call
    pub reset_timeout: Duration,
    /// Length of the rolling window used for the failure rate
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(300),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The call was rejected without being attempted
    #[error("Circuit breaker '{name}' is open, retry in {}ms", .retry_in.as_millis())]
    Open { name: String, retry_in: Duration },

    /// The guarded operation itself failed
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// True if the call was short-circuited
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The operation's own error, if it ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

/// Snapshot of breaker counters
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    /// Failure rate over the current monitoring window (0.0 - 1.0)
    pub failure_rate: f64,
    /// Samples currently in the monitoring window
    pub window_size: usize,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Remaining cooldown while open
    pub next_retry_in: Option<Duration>,
}

/// Circuit breaker internal state
struct InternalState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_requests: u64,
    last_failure_at: Option<DateTime<Utc>>,
    next_retry_at: Option<Instant>,
    /// (recorded at, success)
    window: VecDeque<(Instant, bool)>,
}

impl InternalState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            last_failure_at: None,
            next_retry_at: None,
            window: VecDeque::new(),
        }
    }

    fn record(&mut self, now: Instant, success: bool, period: Duration) {
        self.window.push_back((now, success));
        self.prune(now, period);
    }

    fn prune(&mut self, now: Instant, period: Duration) {
        let Some(cutoff) = now.checked_sub(period) else {
            return;
        };
        while let Some(&(at, _)) = self.window.front() {
            if at <= cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|(_, ok)| !ok).count();
        failures as f64 / self.window.len() as f64
    }
}

/// Circuit Breaker
pub struct CircuitBreaker {
    /// Name of the protected operation
    name: String,
    /// Thresholds
    settings: CircuitBreakerSettings,
    /// Internal state
    state: Mutex<InternalState>,
    /// Optional metrics sink
    metrics: Option<Arc<MetricsState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: Mutex::new(InternalState::new()),
            metrics: None,
        }
    }

    /// Attach a metrics sink
    pub fn with_metrics(mut self, metrics: Arc<MetricsState>) -> Self {
        metrics.set_breaker_state(&self.name, CircuitState::Closed);
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Failure rate over the monitoring window (0.0 - 1.0)
    pub fn failure_rate(&self) -> f64 {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.prune(now, self.settings.monitoring_period);
        state.failure_rate()
    }

    /// Whether a call issued now would be attempted
    pub fn is_call_permitted(&self) -> bool {
        let state = self.state.lock();
        match state.state {
            CircuitState::Open => state
                .next_retry_at
                .map_or(true, |at| Instant::now() >= at),
            _ => true,
        }
    }

    /// Run `operation` through the breaker
    ///
    /// Returns [`CircuitBreakerError::Open`] without invoking `operation`
    /// while the breaker is open and the cooldown has not elapsed.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.admit()?;

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(&e);
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Check admission, moving open -> half-open once the cooldown elapsed
    fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let now = Instant::now();
        let transitioned = {
            let mut state = self.state.lock();
            let mut transitioned = false;
            if state.state == CircuitState::Open {
                match state.next_retry_at {
                    Some(at) if now < at => {
                        return Err(CircuitBreakerError::Open {
                            name: self.name.clone(),
                            retry_in: at - now,
                        });
                    }
                    _ => {
                        state.state = CircuitState::HalfOpen;
                        transitioned = true;
                    }
                }
            }
            state.total_requests += 1;
            transitioned
        };

        if transitioned {
            tracing::info!(breaker = %self.name, "Circuit breaker half-open, trying dependency");
            self.publish_state(CircuitState::HalfOpen);
        }
        Ok(())
    }

    fn on_success(&self) {
        let now = Instant::now();
        let closed = {
            let mut state = self.state.lock();
            state.success_count += 1;
            state.record(now, true, self.settings.monitoring_period);
            if state.state == CircuitState::HalfOpen {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.next_retry_at = None;
                true
            } else {
                false
            }
        };

        if closed {
            tracing::info!(breaker = %self.name, "Circuit breaker closed after successful trial call");
            self.publish_state(CircuitState::Closed);
        }
    }

    fn on_failure<E: fmt::Display>(&self, error: &E) {
        let now = Instant::now();
        let opened = {
            let mut state = self.state.lock();
            state.failure_count += 1;
            state.last_failure_at = Some(Utc::now());
            state.record(now, false, self.settings.monitoring_period);

            let rate = state.failure_rate();
            let rate_exceeded =
                state.window.len() >= MIN_WINDOW_SAMPLES && rate >= FAILURE_RATE_THRESHOLD;

            if state.failure_count >= self.settings.failure_threshold || rate_exceeded {
                state.state = CircuitState::Open;
                state.next_retry_at = Some(now + self.settings.reset_timeout);
                Some((state.failure_count, rate))
            } else {
                None
            }
        };

        match opened {
            Some((failures, rate)) => {
                tracing::warn!(
                    breaker = %self.name,
                    failures,
                    failure_rate = rate,
                    reset_timeout_ms = self.settings.reset_timeout.as_millis() as u64,
                    error = %error,
                    "Circuit breaker OPEN"
                );
                self.publish_state(CircuitState::Open);
            }
            None => {
                tracing::debug!(breaker = %self.name, error = %error, "Guarded call failed");
            }
        }
    }

    /// Read-only snapshot of counters and state
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let state = self.state.lock();
        let cutoff = now.checked_sub(self.settings.monitoring_period);
        let (window_size, failures) = state
            .window
            .iter()
            .filter(|(at, _)| cutoff.map_or(true, |cutoff| *at > cutoff))
            .fold((0usize, 0usize), |(total, failed), (_, ok)| {
                (total + 1, failed + usize::from(!ok))
            });
        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            total_requests: state.total_requests,
            failure_rate: if window_size == 0 {
                0.0
            } else {
                failures as f64 / window_size as f64
            },
            window_size,
            last_failure_at: state.last_failure_at,
            next_retry_in: if state.state == CircuitState::Open {
                state
                    .next_retry_at
                    .map(|at| at.saturating_duration_since(now))
            } else {
                None
            },
        }
    }

    /// Hard reset to closed with all counters zeroed
    pub fn reset(&self) {
        {
            *self.state.lock() = InternalState::new();
        }
        tracing::warn!(breaker = %self.name, "Circuit breaker manually reset");
        self.publish_state(CircuitState::Closed);
    }

    /// Manually open the breaker for one `reset_timeout`
    pub fn force_open(&self) {
        {
            let mut state = self.state.lock();
            state.state = CircuitState::Open;
            state.next_retry_at = Some(Instant::now() + self.settings.reset_timeout);
        }
        tracing::warn!(breaker = %self.name, "Circuit breaker forced open");
        self.publish_state(CircuitState::Open);
    }

    /// Manually close the breaker and clear the failure count
    pub fn force_closed(&self) {
        {
            let mut state = self.state.lock();
            state.state = CircuitState::Closed;
            state.failure_count = 0;
            state.next_retry_at = None;
        }
        tracing::warn!(breaker = %self.name, "Circuit breaker forced closed");
        self.publish_state(CircuitState::Closed);
    }

    fn publish_state(&self, state: CircuitState) {
        if let Some(ref metrics) = self.metrics {
            metrics.set_breaker_state(&self.name, state);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("state", &self.state())
            .finish()
    }
}
