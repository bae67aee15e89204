//! Exponential backoff + circuit breaker for upstream LLM/embedding/vector
//! calls (spec.md §4.5–§4.7). Simplified from darval-multi-llm's
//! `internals/retry.rs`: same shape (max attempts, capped exponential delay,
//! a 5-failure/30s-cooldown circuit breaker) without its tool-calling/event
//! plumbing, which this crate has no use for.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::error::EngineError;
use crate::logging::{log_debug, log_warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, PartialEq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreaker {
    fn should_allow(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match self.last_failure {
                Some(t) if t.elapsed() >= self.recovery_timeout => {
                    self.state = CircuitState::HalfOpen;
                    true
                }
                _ => false,
            },
        }
    }

    fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure = None;
    }

    fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        if self.failure_count >= self.failure_threshold {
            if self.state != CircuitState::Open {
                log_warn!(
                    failure_count = self.failure_count,
                    "upstream circuit breaker opened"
                );
            }
            self.state = CircuitState::Open;
        }
    }
}

/// One breaker per upstream dependency (LLM, embedding, vector store).
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Mutex<CircuitBreaker>,
    label: &'static str,
}

impl RetryExecutor {
    pub fn new(label: &'static str, policy: RetryPolicy) -> Self {
        Self {
            policy,
            breaker: Mutex::new(CircuitBreaker::default()),
            label,
        }
    }

    /// Runs `op`, retrying on `EngineError::is_retryable()` errors with
    /// capped exponential backoff. Short-circuits immediately (without
    /// calling `op`) when the breaker is open.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>>,
    {
        {
            let mut breaker = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
            if !breaker.should_allow() {
                return Err(EngineError::UpstreamDegraded {
                    reason: format!("{} circuit breaker open", self.label),
                });
            }
        }

        let mut delay = self.policy.initial_delay;
        let mut last_err = None;
        for attempt in 1..=self.policy.max_attempts {
            match op().await {
                Ok(value) => {
                    self.breaker.lock().unwrap_or_else(|e| e.into_inner()).record_success();
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    log_debug!(
                        label = self.label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying upstream call after transient error"
                    );
                    sleep(delay).await;
                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * self.policy.backoff_multiplier)
                            .min(self.policy.max_delay.as_secs_f64()),
                    );
                    last_err = Some(e);
                }
                Err(e) => {
                    self.breaker.lock().unwrap_or_else(|e| e.into_inner()).record_failure();
                    return Err(e);
                }
            }
        }
        self.breaker.lock().unwrap_or_else(|e| e.into_inner()).record_failure();
        Err(last_err.unwrap_or(EngineError::UpstreamDegraded {
            reason: format!("{} exhausted retries", self.label),
        }))
    }
}
