//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) yields a working
//! engine sized for a single busy process.

use crate::domain::transaction::TransactionType;
use crate::error::{ProcessingError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub admission: AdmissionConfig,
    pub router: RouterConfig,
    pub resilience: ResilienceConfig,
    pub pools: PoolsConfig,
    pub dispatch: DispatchConfig,
    pub flows: FlowTableConfig,
}

impl EngineConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.admission.max_concurrent_transactions == 0 {
            return Err(invalid("admission.max_concurrent_transactions must be positive"));
        }
        if self.router.batch_size == 0 {
            return Err(invalid("router.batch_size must be positive"));
        }
        if let MissingStepPolicy::Simulate {
            min_delay_ms,
            max_delay_ms,
        } = self.router.missing_step
            && min_delay_ms > max_delay_ms
        {
            return Err(invalid("router.missing_step.min_delay_ms exceeds max_delay_ms"));
        }

        let resilience = &self.resilience;
        if resilience.max_attempts == 0 {
            return Err(invalid("resilience.max_attempts must be at least 1"));
        }
        if resilience.backoff_multiplier < 1.0 {
            return Err(invalid("resilience.backoff_multiplier must be >= 1.0"));
        }
        let breaker = &resilience.circuit_breaker;
        if breaker.sliding_window_size == 0 || breaker.half_open_max_calls == 0 {
            return Err(invalid(
                "circuit_breaker window and half-open call limit must be positive",
            ));
        }
        if !(breaker.failure_rate_threshold > 0.0 && breaker.failure_rate_threshold <= 100.0) {
            return Err(invalid("circuit_breaker.failure_rate_threshold must be in (0, 100]"));
        }

        if self.dispatch.vip_marker.trim().is_empty() {
            return Err(invalid("dispatch.vip_marker must not be blank"));
        }

        for (name, pool) in [
            ("high_throughput", &self.pools.high_throughput),
            ("batch", &self.pools.batch),
            ("priority", &self.pools.priority),
        ] {
            if pool.max_workers == 0 {
                return Err(invalid(&format!("pools.{}.max_workers must be positive", name)));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ProcessingError {
    ProcessingError::Config(message.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Upper bound on transactions in flight across every pool.
    pub max_concurrent_transactions: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transactions: 10_000,
        }
    }
}

/// What the router does with a step name the registry cannot resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MissingStepPolicy {
    /// Log the gap and sleep for a random delay in `[min_delay_ms, max_delay_ms]`.
    Simulate { min_delay_ms: u64, max_delay_ms: u64 },
    /// Abort the flow with `ProcessingError::UnknownStep`.
    Fail,
}

impl Default for MissingStepPolicy {
    fn default() -> Self {
        Self::Simulate {
            min_delay_ms: 50,
            max_delay_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum number of parallel steps launched together.
    pub batch_size: usize,
    pub missing_step: MissingStepPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            missing_step: MissingStepPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of most recent system-relevant calls considered.
    pub sliding_window_size: usize,
    /// Calls required in the window before the failure rate is evaluated.
    pub minimum_calls: usize,
    /// Failure percentage at or above which the breaker opens.
    pub failure_rate_threshold: f64,
    pub open_wait_ms: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            sliding_window_size: 100,
            minimum_calls: 10,
            failure_rate_threshold: 50.0,
            open_wait_ms: 60_000,
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_wait(&self) -> Duration {
        Duration::from_millis(self.open_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Total attempts per flow execution, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Bound on a single attempt.
    pub timeout_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 2_000,
            timeout_ms: 30_000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(retry.saturating_sub(1) as i32);
        let delay_ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    pub high_throughput: PoolConfig,
    pub batch: PoolConfig,
    pub priority: PoolConfig,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            high_throughput: PoolConfig {
                max_workers: 2_000,
                queue_capacity: 10_000,
            },
            batch: PoolConfig {
                max_workers: 800,
                queue_capacity: 5_000,
            },
            priority: PoolConfig {
                max_workers: 300,
                queue_capacity: 1_000,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Amounts strictly above this go to the priority pool and use the high-value flows.
    pub priority_amount_threshold: Decimal,
    /// Case-insensitive marker in the card holder name identifying VIP customers.
    pub vip_marker: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            priority_amount_threshold: dec!(10000),
            vip_marker: "vip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowTableConfig {
    pub standard: HashMap<TransactionType, String>,
    pub high_value: HashMap<TransactionType, String>,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        let standard = HashMap::from([
            (TransactionType::Purchase, "authorize,settle".to_string()),
            (TransactionType::Payment, "validate,post".to_string()),
            (TransactionType::Adjustment, "review,apply".to_string()),
            (
                TransactionType::Refund,
                "refundValidation,refundProcess".to_string(),
            ),
            (TransactionType::Chargeback, "investigate,dispute".to_string()),
        ]);
        let high_value = HashMap::from([
            (
                TransactionType::Purchase,
                "fraudCheck,riskAssessment,authorize,parallel:settle,parallel:notification,parallel:compliance"
                    .to_string(),
            ),
            (
                TransactionType::Payment,
                "fraudCheck,validate,post,parallel:notification,parallel:auditTrail".to_string(),
            ),
            (
                TransactionType::Adjustment,
                "review,executiveApproval,auditTrail,parallel:apply,parallel:notification,parallel:compliance"
                    .to_string(),
            ),
        ]);
        Self {
            standard,
            high_value,
        }
    }
}
