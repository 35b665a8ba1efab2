use crate::error::{FailureKind, ProcessingError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Status discriminator reported with every outcome.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    BusinessRuleViolation,
    SystemError,
    CapacityExceeded,
}

impl OutcomeStatus {
    pub fn for_error(err: &ProcessingError) -> Self {
        if err.is_capacity_exceeded() {
            return Self::CapacityExceeded;
        }
        match err.kind() {
            FailureKind::Business | FailureKind::InvalidInput => Self::BusinessRuleViolation,
            FailureKind::System => Self::SystemError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BusinessRuleViolation => "business_rule_violation",
            Self::SystemError => "system_error",
            Self::CapacityExceeded => "capacity_exceeded",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReceipt {
    pub transaction_id: String,
    /// Type-specific success token, e.g. `PAYMENT_SUCCESS:TXN-...`.
    pub result: String,
    pub elapsed: Duration,
}

/// A failed submission. The transaction id is always present for correlation.
#[derive(Debug, Clone)]
pub struct TransactionFailure {
    pub transaction_id: String,
    pub status: OutcomeStatus,
    pub error: ProcessingError,
    pub elapsed: Duration,
}

impl TransactionFailure {
    pub fn new(transaction_id: String, error: ProcessingError, elapsed: Duration) -> Self {
        Self {
            transaction_id,
            status: OutcomeStatus::for_error(&error),
            error,
            elapsed,
        }
    }

    pub fn business_code(&self) -> Option<&str> {
        self.error.violation().map(|violation| violation.code.as_str())
    }

    /// Caller-facing message. System faults are reported generically; details stay in the logs.
    pub fn message(&self) -> String {
        match self.status {
            OutcomeStatus::SystemError => {
                "Internal error occurred while processing transaction".to_string()
            }
            _ => match self.error.violation() {
                Some(violation) => violation.reason.clone(),
                None => self.error.to_string(),
            },
        }
    }
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.transaction_id, self.status, self.error)
    }
}

impl std::error::Error for TransactionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type TransactionOutcome = std::result::Result<TransactionReceipt, TransactionFailure>;

/// Read-only aggregate computed from the dispatcher's live counters.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    /// Submissions turned away at admission; not part of the totals above.
    pub rejected_transactions: u64,
    pub active_transactions: usize,
    pub available_capacity: usize,
}

impl PerformanceSnapshot {
    /// Percentage of accepted transactions that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total_transactions == 0 {
            return 0.0;
        }
        self.successful_transactions as f64 / self.total_transactions as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CAPACITY_EXCEEDED;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            OutcomeStatus::for_error(&ProcessingError::business(CAPACITY_EXCEEDED, "full")),
            OutcomeStatus::CapacityExceeded
        );
        assert_eq!(
            OutcomeStatus::for_error(&ProcessingError::business("INVALID_AMOUNT", "missing")),
            OutcomeStatus::BusinessRuleViolation
        );
        assert_eq!(
            OutcomeStatus::for_error(&ProcessingError::TaskFailed("panic".into())),
            OutcomeStatus::SystemError
        );
    }

    #[test]
    fn test_system_failure_message_is_generic() {
        let failure = TransactionFailure::new(
            "TXN-1-1".into(),
            ProcessingError::step("post", "connection refused"),
            Duration::from_millis(3),
        );
        assert_eq!(failure.status, OutcomeStatus::SystemError);
        assert!(failure.business_code().is_none());
        assert!(!failure.message().contains("connection refused"));
    }

    #[test]
    fn test_success_rate() {
        let snapshot = PerformanceSnapshot {
            total_transactions: 4,
            successful_transactions: 3,
            failed_transactions: 1,
            rejected_transactions: 2,
            active_transactions: 0,
            available_capacity: 10,
        };
        assert_eq!(snapshot.success_rate(), 75.0);

        let empty = PerformanceSnapshot {
            total_transactions: 0,
            ..snapshot
        };
        assert_eq!(empty.success_rate(), 0.0);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&OutcomeStatus::BusinessRuleViolation).unwrap();
        assert_eq!(json, "\"business_rule_violation\"");
    }
}
