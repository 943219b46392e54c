//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker: Closed (normal operation), Open (failing fast) and
//! Half-Open (testing recovery). Failures only count toward opening while they are
//! consecutive and inside the rolling window; a success or an aged-out failure resets
//! the streak.
//!
//! State checks are synchronous so callers can fail fast without awaiting.

use crate::error::ProvisionerError;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - probe calls allowed to test target health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E: Into<ProvisionerError>> From<CircuitBreakerError<E>> for ProvisionerError {
    fn from(error: CircuitBreakerError<E>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { component } => {
                ProvisionerError::CircuitOpen { key: component }
            }
            CircuitBreakerError::OperationFailed(inner) => inner.into(),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    /// Timestamps of the current failure streak, oldest first
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    metrics: CircuitBreakerMetrics,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        debug!(
            component = %name,
            failure_threshold = config.failure_threshold,
            window_seconds = config.window.as_secs(),
            cool_down_seconds = config.cool_down.as_secs(),
            success_threshold = config.success_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(BreakerInner {
                failures: VecDeque::new(),
                opened_at: None,
                metrics: CircuitBreakerMetrics::new(),
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration),
            Err(_) => self.record_failure(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed, moving Open to HalfOpen once the cool-down elapsed
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let mut inner = self.inner.lock();
                let cooled_down = inner
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.cool_down)
                    .unwrap_or(true);

                if cooled_down {
                    self.transition_to_half_open(&mut inner);
                    true
                } else {
                    inner.metrics.rejected_calls += 1;
                    false
                }
            }
        }
    }

    pub fn record_success(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.total_duration += duration;
        inner.failures.clear();
        inner.metrics.consecutive_failures = 0;

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "🟢 Operation succeeded"
        );

        match self.state() {
            CircuitState::HalfOpen => {
                inner.metrics.half_open_successes += 1;
                if inner.metrics.half_open_successes >= self.config.success_threshold as u64 {
                    self.transition_to_closed(&mut inner);
                }
            }
            CircuitState::Closed => {}
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    pub fn record_failure(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.total_duration += duration;

        inner.failures.push_back(now);
        while let Some(oldest) = inner.failures.front() {
            if now.duration_since(*oldest) > self.config.window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
        inner.metrics.consecutive_failures = inner.failures.len() as u64;

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            consecutive_failures = inner.failures.len(),
            "🔴 Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        inner.failures.clear();
        inner.opened_at = None;
        inner.metrics.consecutive_failures = 0;
        inner.metrics.half_open_successes = 0;

        info!(
            component = %self.name,
            total_calls = inner.metrics.total_calls,
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        inner.opened_at = Some(Instant::now());
        inner.metrics.half_open_successes = 0;
        inner.metrics.open_count += 1;

        error!(
            component = %self.name,
            consecutive_failures = inner.failures.len(),
            failure_threshold = self.config.failure_threshold,
            cool_down_seconds = self.config.cool_down.as_secs(),
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self, inner: &mut BreakerInner) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);
        inner.metrics.half_open_successes = 0;

        info!(
            component = %self.name,
            success_threshold = self.config.success_threshold,
            "🟡 Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.transition_to_open(&mut inner);
    }

    /// Force circuit to closed state
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let mut snapshot = inner.metrics.clone();
        snapshot.current_state = self.state();

        if snapshot.total_calls > 0 {
            snapshot.failure_rate = snapshot.failure_count as f64 / snapshot.total_calls as f64;
            snapshot.average_duration = snapshot.total_duration / snapshot.total_calls as u32;
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn config(failure_threshold: u32, window_ms: u64, cool_down_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            window: Duration::from_millis(window_ms),
            cool_down: Duration::from_millis(cool_down_ms),
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = CircuitBreaker::new("test".to_string(), config(3, 1_000, 100));

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_on_consecutive_failures() {
        let circuit = CircuitBreaker::new("test".to_string(), config(2, 1_000, 10_000));

        let _ = circuit.call(|| async { Err::<String, _>("refused") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);

        let _ = circuit.call(|| async { Err::<String, _>("refused") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let result = circuit
            .call(|| async { Ok::<_, String>("should not execute") })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        assert_eq!(circuit.metrics().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let circuit = CircuitBreaker::new("test".to_string(), config(2, 1_000, 10_000));

        let _ = circuit.call(|| async { Err::<String, _>("refused") }).await;
        let _ = circuit.call(|| async { Ok::<_, &str>("ok".to_string()) }).await;
        let _ = circuit.call(|| async { Err::<String, _>("refused") }).await;

        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_failures_outside_window_do_not_accumulate() {
        let circuit = CircuitBreaker::new("test".to_string(), config(2, 30, 10_000));

        let _ = circuit.call(|| async { Err::<String, _>("refused") }).await;
        sleep(Duration::from_millis(60)).await;
        let _ = circuit.call(|| async { Err::<String, _>("refused") }).await;

        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_recovery() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 1_000, 50));

        let _ = circuit.call(|| async { Err::<String, _>("refused") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(60)).await;

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 1_000, 20));

        let _ = circuit.call(|| async { Err::<String, _>("refused") }).await;
        sleep(Duration::from_millis(30)).await;

        assert!(circuit.allow_request());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        circuit.record_failure(Duration::from_millis(1));
        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.metrics().open_count, 2);
    }

    #[test]
    fn test_force_operations() {
        let circuit = CircuitBreaker::new("test".to_string(), CircuitBreakerConfig::default());

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.allow_request());

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_error_converts_to_circuit_open() {
        let error: ProvisionerError = CircuitBreakerError::<ProvisionerError>::CircuitOpen {
            component: "root@host:22".to_string(),
        }
        .into();
        assert_eq!(
            error,
            ProvisionerError::CircuitOpen {
                key: "root@host:22".to_string()
            }
        );
    }
}
