//! Circuit breaker protecting every call into the external agent.
//!
//! Too many consecutive failures open the circuit; while open, calls fail
//! fast without being attempted. After a cooldown the circuit half-opens and
//! lets probe calls through until enough consecutive successes close it
//! again.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::AgentError;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation -- all calls pass through.
    Closed,
    /// Too many failures -- calls are rejected immediately.
    Open,
    /// Testing recovery -- limited calls are allowed through.
    HalfOpen,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive successes in half-open before closing.
    pub success_threshold: u32,
    /// How long the circuit stays open before transitioning to half-open.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Rolling call counters. `total_calls == successful_calls + failed_calls`
/// always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl CircuitMetrics {
    fn record_success(&mut self) {
        self.total_calls += 1;
        self.successful_calls += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.total_calls += 1;
        self.failed_calls += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InnerState {
    state: CircuitState,
    metrics: CircuitMetrics,
    last_failure_time: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<InnerState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(InnerState {
                state: CircuitState::Closed,
                metrics: CircuitMetrics::default(),
                last_failure_time: None,
            })),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn metrics(&self) -> CircuitMetrics {
        self.inner.lock().await.metrics
    }

    /// Execute `f` through the circuit breaker.
    ///
    /// If the circuit is **Open** and the cooldown has not elapsed the call
    /// is rejected immediately with [`AgentError::CircuitOpen`] -- a fast
    /// fail, not a retry. If the cooldown *has* elapsed the circuit moves to
    /// **HalfOpen** and the call is allowed through as a probe.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        {
            let mut guard = self.inner.lock().await;
            match guard.state {
                CircuitState::Open => {
                    let elapsed_ok = guard
                        .last_failure_time
                        .is_some_and(|t| t.elapsed() >= self.config.timeout);
                    if elapsed_ok {
                        info!("circuit breaker transitioning Open -> HalfOpen");
                        guard.state = CircuitState::HalfOpen;
                        guard.metrics.consecutive_successes = 0;
                    } else {
                        return Err(AgentError::CircuitOpen);
                    }
                }
                CircuitState::Closed | CircuitState::HalfOpen => { /* allow */ }
            }
        }

        match f().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    async fn record_success(&self) {
        let mut guard = self.inner.lock().await;
        guard.metrics.record_success();
        match guard.state {
            CircuitState::HalfOpen => {
                if guard.metrics.consecutive_successes >= self.config.success_threshold {
                    info!("circuit breaker transitioning HalfOpen -> Closed");
                    guard.state = CircuitState::Closed;
                }
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut guard = self.inner.lock().await;
        guard.metrics.record_failure();
        guard.last_failure_time = Some(Instant::now());

        match guard.state {
            CircuitState::Closed => {
                if guard.metrics.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = guard.metrics.consecutive_failures,
                        "circuit breaker transitioning Closed -> Open"
                    );
                    guard.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker transitioning HalfOpen -> Open (failure during probe)");
                guard.state = CircuitState::Open;
            }
            CircuitState::Open => { /* already open */ }
        }
    }

    /// Manually reset to **Closed**, clearing streaks but keeping totals.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        guard.state = CircuitState::Closed;
        guard.metrics.consecutive_failures = 0;
        guard.metrics.consecutive_successes = 0;
        guard.last_failure_time = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(failure_threshold: u32, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            timeout: Duration::from_millis(50),
        })
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(|| async { Err::<(), _>(AgentError::Other("boom".into())) })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        breaker
            .call(|| async { Ok::<_, AgentError>(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = fast_breaker(3, 1);
        for _ in 0..2 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast() {
        let breaker = fast_breaker(1, 1);
        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        let before = breaker.metrics().await;
        let result = breaker.call(|| async { Ok::<_, AgentError>(()) }).await;
        assert!(matches!(result, Err(AgentError::CircuitOpen)));
        // The rejected call never executed, so counters are untouched.
        assert_eq!(breaker.metrics().await, before);
    }

    #[tokio::test]
    async fn half_open_after_timeout_then_closes_on_successes() {
        let breaker = fast_breaker(1, 2);
        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        succeed(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        succeed(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failure_in_half_open_reopens() {
        let breaker = fast_breaker(1, 2);
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        succeed(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn metrics_invariant_holds() {
        let breaker = fast_breaker(100, 1);
        for i in 0..20 {
            if i % 3 == 0 {
                fail(&breaker).await;
            } else {
                succeed(&breaker).await;
            }
            let m = breaker.metrics().await;
            assert_eq!(m.total_calls, m.successful_calls + m.failed_calls);
        }
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let breaker = fast_breaker(3, 1);
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;
        // Streak was broken, so 2+2 failures with a success between never opens.
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn reset_keeps_totals() {
        let breaker = fast_breaker(1, 1);
        fail(&breaker).await;
        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        let m = breaker.metrics().await;
        assert_eq!(m.total_calls, 1);
        assert_eq!(m.consecutive_failures, 0);
    }
}
