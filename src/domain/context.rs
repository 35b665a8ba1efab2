use super::transaction::TransactionRequest;
use crate::error::ProcessingError;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Tracks one in-flight transaction from acceptance until it leaves the dispatcher.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub transaction_id: String,
    pub request: TransactionRequest,
    pub started_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub business_code: Option<String>,
    started: Instant,
    finished: Option<Instant>,
}

impl TransactionContext {
    pub fn new(transaction_id: String, request: TransactionRequest) -> Self {
        Self {
            transaction_id,
            request,
            started_at: Utc::now(),
            validated_at: None,
            completed_at: None,
            failure_reason: None,
            business_code: None,
            started: Instant::now(),
            finished: None,
        }
    }

    pub fn mark_validation_complete(&mut self) {
        self.validated_at = Some(Utc::now());
    }

    pub fn mark_processing_complete(&mut self) {
        self.completed_at = Some(Utc::now());
        self.finished = Some(Instant::now());
    }

    pub fn mark_processing_failed(&mut self, err: &ProcessingError) {
        match err.violation() {
            Some(violation) => {
                self.business_code = Some(violation.code.clone());
                self.failure_reason = Some(violation.reason.clone());
            }
            None => self.failure_reason = Some(err.to_string()),
        }
        self.finished = Some(Instant::now());
    }

    /// Time since acceptance, frozen once processing completes or fails.
    pub fn elapsed(&self) -> Duration {
        match self.finished {
            Some(finished) => finished.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }
}
