//! Circuit breaker implementation
//!
//! Process-wide health gate over the inference endpoint. Every read-then-write
//! of the counters and the state happens under one lock, so concurrent reports
//! can neither lose an increment nor trigger a transition twice.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, requests are probes
    HalfOpen,
}

impl CircuitBreakerState {
    /// Numeric encoding used by the Prometheus gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitBreakerState::Closed => 0,
            CircuitBreakerState::HalfOpen => 1,
            CircuitBreakerState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name of this circuit breaker (for logging)
    pub name: String,
    /// Consecutive failures in closed state before opening
    pub failure_threshold: u32,
    /// Consecutive successes in half-open state before closing
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "inference".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

impl From<&redraft_core::CircuitBreakerConfig> for CircuitBreakerConfig {
    fn from(config: &redraft_core::CircuitBreakerConfig) -> Self {
        Self::default()
            .with_failure_threshold(config.failure_threshold)
            .with_success_threshold(config.success_threshold)
            .with_cooldown(Duration::from_secs(config.cooldown_secs))
    }
}

struct CircuitInner {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Monotonic time of the last transition; drives the cooldown
    transitioned_at: Instant,
    /// Wall-clock time of the last transition, for reporting
    transitioned_at_utc: DateTime<Utc>,
}

impl CircuitInner {
    fn transition(&mut self, name: &str, to: CircuitBreakerState) {
        let from = self.state;
        if from == to {
            return;
        }

        match to {
            CircuitBreakerState::Open => warn!(
                circuit_breaker = %name,
                from = %from,
                to = %to,
                consecutive_failures = self.consecutive_failures,
                "Circuit breaker state transition"
            ),
            _ => info!(
                circuit_breaker = %name,
                from = %from,
                to = %to,
                "Circuit breaker state transition"
            ),
        }

        self.state = to;
        self.transitioned_at = Instant::now();
        self.transitioned_at_utc = Utc::now();

        match to {
            CircuitBreakerState::Closed => {
                self.consecutive_failures = 0;
                self.consecutive_successes = 0;
            }
            CircuitBreakerState::HalfOpen => {
                self.consecutive_successes = 0;
            }
            CircuitBreakerState::Open => {
                self.consecutive_successes = 0;
            }
        }
    }
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitBreakerState,
    pub consecutive_failures: u32,
    /// Only meaningful while half-open
    pub consecutive_successes: u32,
    pub last_transition: DateTime<Utc>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

#[derive(Default)]
struct CircuitCounters {
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

/// Thread-safe circuit breaker, cheap to clone
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<CircuitInner>>,
    counters: Arc<CircuitCounters>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in the closed state
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(CircuitInner {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                transitioned_at: Instant::now(),
                transitioned_at_utc: Utc::now(),
            })),
            counters: Arc::new(CircuitCounters::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state
    pub async fn state(&self) -> CircuitBreakerState {
        self.inner.lock().await.state
    }

    /// Check whether a call may proceed.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here,
    /// before the probe call executes.
    pub async fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                if inner.transitioned_at.elapsed() >= self.config.cooldown {
                    inner.transition(&self.config.name, CircuitBreakerState::HalfOpen);
                    true
                } else {
                    self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        circuit_breaker = %self.config.name,
                        "Request rejected, circuit is open"
                    );
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        self.counters.successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitBreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitBreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.transition(&self.config.name, CircuitBreakerState::Closed);
                }
            }
            CircuitBreakerState::Open => {
                // A call admitted before the circuit opened finished late;
                // the cooldown still governs recovery.
            }
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitBreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.transition(&self.config.name, CircuitBreakerState::Open);
                }
            }
            CircuitBreakerState::HalfOpen => {
                inner.consecutive_failures += 1;
                inner.transition(&self.config.name, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    /// Get a consistent snapshot of state and counters
    pub async fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().await;
        CircuitSnapshot {
            name: self.config.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_transition: inner.transitioned_at_utc,
            total_successes: self.counters.successes.load(Ordering::Relaxed),
            total_failures: self.counters.failures.load(Ordering::Relaxed),
            rejected_calls: self.counters.rejections.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(crate) async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        inner.transition(&self.config.name, CircuitBreakerState::Open);
    }

    #[cfg(test)]
    pub(crate) async fn force_close(&self) {
        let mut inner = self.inner.lock().await;
        inner.transition(&self.config.name, CircuitBreakerState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new("test")
                .with_failure_threshold(failures)
                .with_success_threshold(successes)
                .with_cooldown(Duration::from_millis(cooldown_ms)),
        )
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.state().await, CircuitBreakerState::Closed);
        assert!(cb.allow_request().await);
    }

    #[tokio::test]
    async fn test_circuit_opens_on_consecutive_failures() {
        let cb = breaker(3, 1, 1000);

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Open);
        assert!(!cb.allow_request().await);

        let snapshot = cb.snapshot().await;
        assert_eq!(snapshot.consecutive_failures, 3);
        assert_eq!(snapshot.rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 1, 1000);

        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        cb.record_failure().await;

        assert_eq!(cb.state().await, CircuitBreakerState::Closed);
        assert_eq!(cb.snapshot().await.consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_rejects_until_cooldown() {
        let cb = breaker(2, 1, 10_000);
        cb.record_failure().await;
        cb.record_failure().await;

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(!cb.allow_request().await);
        assert_eq!(cb.state().await, CircuitBreakerState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.allow_request().await);
        assert_eq!(cb.state().await, CircuitBreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let cb = breaker(2, 2, 100);
        cb.record_failure().await;
        cb.record_failure().await;

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request().await);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitBreakerState::HalfOpen);
        assert_eq!(cb.snapshot().await.consecutive_successes, 1);

        cb.record_success().await;
        let snapshot = cb.snapshot().await;
        assert_eq!(snapshot.state, CircuitBreakerState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let cb = breaker(2, 2, 100);
        cb.record_failure().await;
        cb.record_failure().await;

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request().await);
        cb.record_success().await;
        cb.record_failure().await;

        assert_eq!(cb.state().await, CircuitBreakerState::Open);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!cb.allow_request().await);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(cb.allow_request().await);
    }

    #[tokio::test]
    async fn test_concurrent_failures_transition_once() {
        let cb = breaker(10, 1, 60_000);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cb = cb.clone();
            handles.push(tokio::spawn(async move { cb.record_failure().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = cb.snapshot().await;
        assert_eq!(snapshot.state, CircuitBreakerState::Open);
        assert_eq!(snapshot.total_failures, 50);
        assert_eq!(snapshot.consecutive_failures, 50);
    }

    #[tokio::test]
    async fn test_force_transitions() {
        let cb = breaker(5, 1, 60_000);
        cb.force_open().await;
        assert!(!cb.allow_request().await);
        cb.force_close().await;
        assert!(cb.allow_request().await);
    }
}
