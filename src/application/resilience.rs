//! Retry, timeout and circuit breaking around a single flow execution.
//!
//! Only system failures move the breaker and trigger retries. Business violations and invalid
//! input pass straight through with their classification untouched.

use crate::config::{CircuitBreakerConfig, ResilienceConfig};
use crate::error::{FailureKind, ProcessingError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the wait period elapses.
    Open,
    /// A limited number of trial calls decide whether to close again.
    HalfOpen,
}

struct BreakerInner {
    state: CircuitBreakerState,
    /// Most recent outcomes while closed; `true` marks a system failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_calls: u32,
    half_open_successes: u32,
    last_failure: Option<ProcessingError>,
}

impl BreakerInner {
    fn open(&mut self) {
        self.state = CircuitBreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.window.clear();
        self.half_open_calls = 0;
        self.half_open_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitBreakerState::Closed;
        self.opened_at = None;
        self.window.clear();
        self.half_open_calls = 0;
        self.half_open_successes = 0;
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        failures as f64 / self.window.len() as f64 * 100.0
    }
}

/// Count-based sliding-window circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, mut config: CircuitBreakerConfig) -> Self {
        config.sliding_window_size = config.sliding_window_size.max(1);
        config.half_open_max_calls = config.half_open_max_calls.max(1);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_calls: 0,
                half_open_successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, moving an expired open breaker to half-open.
    pub async fn state(&self) -> CircuitBreakerState {
        let mut inner = self.inner.lock().await;
        self.expire_open(&mut inner);
        inner.state
    }

    /// Asks permission for one call. Rejections carry the last system failure as their cause.
    pub async fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.expire_open(&mut inner);
        match inner.state {
            CircuitBreakerState::Closed => Ok(()),
            CircuitBreakerState::HalfOpen if inner.half_open_calls < self.config.half_open_max_calls => {
                inner.half_open_calls += 1;
                debug!(
                    breaker = %self.name,
                    "Half-open trial call {}/{}",
                    inner.half_open_calls,
                    self.config.half_open_max_calls
                );
                Ok(())
            }
            _ => Err(ProcessingError::CircuitOpen {
                breaker: self.name.clone(),
                cause: inner.last_failure.clone().map(Box::new),
            }),
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitBreakerState::Closed => self.push_outcome(&mut inner, false),
            CircuitBreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    inner.close();
                    info!(breaker = %self.name, "Circuit breaker closed after successful trial calls");
                }
            }
            CircuitBreakerState::Open => {}
        }
    }

    pub async fn record_system_failure(&self, err: &ProcessingError) {
        let mut inner = self.inner.lock().await;
        inner.last_failure = Some(err.clone());
        match inner.state {
            CircuitBreakerState::Closed => self.push_outcome(&mut inner, true),
            CircuitBreakerState::HalfOpen => {
                inner.open();
                warn!(breaker = %self.name, "Circuit breaker reopened after half-open failure");
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Releases a permit for a call whose outcome says nothing about system health.
    pub async fn record_ignored(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitBreakerState::HalfOpen {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }
    }

    pub async fn failure_rate(&self) -> f64 {
        self.inner.lock().await.failure_rate()
    }

    fn push_outcome(&self, inner: &mut BreakerInner, failed: bool) {
        inner.window.push_back(failed);
        while inner.window.len() > self.config.sliding_window_size {
            inner.window.pop_front();
        }
        if inner.window.len() >= self.config.minimum_calls.max(1)
            && inner.failure_rate() >= self.config.failure_rate_threshold
        {
            let rate = inner.failure_rate();
            inner.open();
            warn!(breaker = %self.name, "Circuit breaker opened at {:.1}% system failures", rate);
        }
    }

    fn expire_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitBreakerState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.open_wait())
        {
            inner.state = CircuitBreakerState::HalfOpen;
            inner.half_open_calls = 0;
            inner.half_open_successes = 0;
            info!(breaker = %self.name, "Circuit breaker half-open after wait period");
        }
    }
}

/// Retry + timeout + circuit breaker composed around one operation.
pub struct ResiliencePolicy {
    config: ResilienceConfig,
    breaker: CircuitBreaker,
    system_failures: AtomicU64,
    business_failures: AtomicU64,
    retries: AtomicU64,
}

impl ResiliencePolicy {
    pub fn new(name: impl Into<String>, mut config: ResilienceConfig) -> Self {
        config.max_attempts = config.max_attempts.max(1);
        let breaker = CircuitBreaker::new(name, config.circuit_breaker.clone());
        Self {
            config,
            breaker,
            system_failures: AtomicU64::new(0),
            business_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// System failures observed, counting every failed attempt.
    pub fn system_failures(&self) -> u64 {
        self.system_failures.load(Ordering::Relaxed)
    }

    pub fn business_failures(&self) -> u64 {
        self.business_failures.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Runs `operation`, retrying system failures with backoff.
    ///
    /// Each attempt is bounded by the configured timeout and must be admitted by the breaker.
    /// When the breaker rejects an attempt the result is `ProcessingError::CircuitOpen` wrapping
    /// the last real system failure.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.timeout();
        let mut attempt = 1;
        loop {
            if let Err(open) = self.breaker.try_acquire().await {
                warn!("Circuit breaker rejected execution: {}", open);
                return Err(open);
            }

            let result = tokio::time::timeout(timeout, operation())
                .await
                .unwrap_or_else(|_| Err(ProcessingError::Timeout(timeout)));

            let err = match result {
                Ok(value) => {
                    self.breaker.record_success().await;
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.kind() {
                FailureKind::Business => {
                    self.business_failures.fetch_add(1, Ordering::Relaxed);
                    self.breaker.record_ignored().await;
                    return Err(err);
                }
                FailureKind::InvalidInput => {
                    self.breaker.record_ignored().await;
                    return Err(err);
                }
                FailureKind::System => {
                    self.system_failures.fetch_add(1, Ordering::Relaxed);
                    self.breaker.record_system_failure(&err).await;
                    if attempt >= self.config.max_attempts {
                        error!("Giving up after {} attempts: {}", attempt, err);
                        return Err(err);
                    }
                    let delay = self.config.backoff(attempt);
                    warn!(
                        "Attempt {}/{} failed, retrying in {:?}: {}",
                        attempt, self.config.max_attempts, delay, err
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
