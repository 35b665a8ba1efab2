use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Code attached to the business violation raised when the admission pool is exhausted.
pub const CAPACITY_EXCEEDED: &str = "CAPACITY_EXCEEDED";

/// An expected, domain-meaningful rejection.
///
/// Business violations are surfaced to the caller verbatim. They are never retried and never
/// count toward circuit breaker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessRuleViolation {
    pub code: String,
    pub reason: String,
}

impl BusinessRuleViolation {
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BusinessRuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.reason)
    }
}

/// Coarse classification used by the resilience policy and by outcome reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Business,
    InvalidInput,
    System,
}

#[derive(Error, Debug, Clone)]
pub enum ProcessingError {
    #[error("Business rule violation: {0}")]
    BusinessRule(BusinessRuleViolation),
    #[error("Invalid flow specification: {0}")]
    InvalidFlow(String),
    #[error("No step registered for '{0}'")]
    UnknownStep(String),
    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },
    #[error("Flow execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("Task did not run to completion: {0}")]
    TaskFailed(String),
    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen {
        breaker: String,
        #[source]
        cause: Option<Box<ProcessingError>>,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),
    #[error("CSV error: {0}")]
    Csv(Arc<csv::Error>),
}

impl ProcessingError {
    pub fn business(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BusinessRule(BusinessRuleViolation::new(code, reason))
    }

    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::BusinessRule(_) => FailureKind::Business,
            Self::InvalidFlow(_) | Self::UnknownStep(_) | Self::Config(_) | Self::Json(_) => {
                FailureKind::InvalidInput
            }
            Self::Step { .. }
            | Self::Timeout(_)
            | Self::TaskFailed(_)
            | Self::CircuitOpen { .. }
            | Self::Io(_)
            | Self::Csv(_) => FailureKind::System,
        }
    }

    /// Returns the business violation carried by this error, if any.
    pub fn violation(&self) -> Option<&BusinessRuleViolation> {
        match self {
            Self::BusinessRule(violation) => Some(violation),
            _ => None,
        }
    }

    pub fn is_capacity_exceeded(&self) -> bool {
        self.violation()
            .is_some_and(|violation| violation.code == CAPACITY_EXCEEDED)
    }
}

impl From<BusinessRuleViolation> for ProcessingError {
    fn from(violation: BusinessRuleViolation) -> Self {
        Self::BusinessRule(violation)
    }
}

impl From<std::io::Error> for ProcessingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<csv::Error> for ProcessingError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ProcessingError>;
