//! Retry policy with exponential backoff.
//!
//! Wraps agent invocations: retryable errors back off and try again, fatal
//! errors surface immediately, and an open circuit aborts without consuming
//! the retry budget.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::AgentError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Rejects a policy whose cap is below its starting backoff.
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
    ) -> Result<Self, AgentError> {
        if max_backoff < initial_backoff {
            return Err(AgentError::Other(format!(
                "max_backoff ({max_backoff:?}) must be >= initial_backoff ({initial_backoff:?})"
            )));
        }
        Ok(Self {
            max_retries,
            initial_backoff,
            max_backoff,
            multiplier,
        })
    }

    /// Backoff before retry `attempt`: `min(max, initial * multiplier^attempt)`.
    ///
    /// Attempt 0 yields exactly `initial_backoff`; a negative attempt yields
    /// zero.
    pub fn calculate_backoff(&self, attempt: i32) -> Duration {
        if attempt < 0 {
            return Duration::ZERO;
        }
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt);
        let capped = scaled.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Sum of every backoff the policy could ever wait, assuming all
    /// `max_retries` attempts fail.
    pub fn total_worst_case_wait(&self) -> Duration {
        (0..self.max_retries as i32)
            .map(|attempt| self.calculate_backoff(attempt))
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Run `operation` through the breaker, retrying retryable failures with
/// backoff.
///
/// [`AgentError::CircuitOpen`] aborts immediately: the breaker has already
/// decided the upstream is unhealthy, so burning the retry budget against it
/// is pointless. Fatal errors (auth, content filter) also surface without
/// retry. Cancellation is observed between attempts and during backoff.
pub async fn run_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    cancel: &CancelToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(AgentError::Other(format!(
                "{operation_name} cancelled before attempt"
            )));
        }

        match breaker.call(&mut operation).await {
            Ok(value) => return Ok(value),
            Err(AgentError::CircuitOpen) => {
                warn!(operation = operation_name, "circuit open, aborting without retry");
                return Err(AgentError::CircuitOpen);
            }
            Err(e) if !e.is_retryable() => {
                warn!(operation = operation_name, error = %e, "fatal error, not retrying");
                return Err(e);
            }
            Err(e) => {
                if attempt >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %e,
                        "retry budget exhausted"
                    );
                    return Err(e);
                }
                // RateLimited errors may carry a server-suggested wait that
                // overrides the computed backoff.
                let backoff = match &e {
                    AgentError::RateLimited {
                        retry_after: Some(wait),
                        ..
                    } => *wait,
                    _ => policy.calculate_backoff(attempt as i32),
                };
                info!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs_f64(),
                    error = %e,
                    "retrying after backoff"
                );
                if cancel.sleep(backoff).await.is_err() {
                    return Err(AgentError::Other(format!(
                        "{operation_name} cancelled during backoff"
                    )));
                }
                attempt += 1;
            }
        }
    }
}
