#![allow(dead_code)]

use async_trait::async_trait;
use flowgate::config::{AdmissionConfig, EngineConfig, MissingStepPolicy};
use flowgate::domain::ports::{FlowResolver, Step};
use flowgate::domain::transaction::{TransactionRequest, TransactionType};
use flowgate::domain::variables::TransactionVariables;
use flowgate::error::{ProcessingError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Ordered log of step start/end events.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("missing event {event}"))
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

/// Records `start:<name>` and `end:<name>` around a short sleep.
pub struct RecordingStep {
    pub name: &'static str,
    pub journal: Journal,
    pub delay: Duration,
}

impl RecordingStep {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: journal.clone(),
            delay: Duration::from_millis(5),
        }
    }
}

#[async_trait]
impl Step for RecordingStep {
    async fn run(&self, vars: &TransactionVariables) -> Result<()> {
        self.journal.push(format!("start:{}", self.name));
        tokio::time::sleep(self.delay).await;
        vars.set(format!("{}Status", self.name), "DONE");
        self.journal.push(format!("end:{}", self.name));
        Ok(())
    }
}

/// Raises the given business violation every time.
pub struct RejectingStep {
    pub code: &'static str,
    pub journal: Journal,
}

#[async_trait]
impl Step for RejectingStep {
    async fn run(&self, _vars: &TransactionVariables) -> Result<()> {
        self.journal.push(format!("start:{}", self.code));
        Err(ProcessingError::business(self.code, "rejected by test step"))
    }
}

/// Fails with a system error for the first `failures` calls, then succeeds.
pub struct FlakyStep {
    pub failures: usize,
    pub calls: Arc<AtomicUsize>,
}

impl FlakyStep {
    pub fn new(failures: usize) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                failures,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Step for FlakyStep {
    async fn run(&self, _vars: &TransactionVariables) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ProcessingError::step("flaky", "downstream unavailable"));
        }
        Ok(())
    }
}

/// Blocks until the test adds a permit to the gate.
pub struct GateStep(pub Arc<Semaphore>);

#[async_trait]
impl Step for GateStep {
    async fn run(&self, _vars: &TransactionVariables) -> Result<()> {
        let _open = self.0.acquire().await;
        Ok(())
    }
}

/// Resolver returning the same flow for every transaction.
pub struct FixedFlow(pub &'static str);

impl FlowResolver for FixedFlow {
    fn resolve_flow(&self, _: TransactionType, _: &TransactionRequest) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// Resolver picking one of two flows by comparing the amount against a limit.
pub struct FlowByAmount {
    pub limit: rust_decimal::Decimal,
    pub at_or_below: &'static str,
    pub above: &'static str,
}

impl FlowResolver for FlowByAmount {
    fn resolve_flow(&self, _: TransactionType, request: &TransactionRequest) -> Result<String> {
        let above = request.amount.is_some_and(|amount| amount > self.limit);
        Ok(if above { self.above } else { self.at_or_below }.to_string())
    }
}

/// Engine config with the given capacity, fast retries and a short missing-step delay.
pub fn test_config(capacity: usize) -> EngineConfig {
    let mut config = EngineConfig {
        admission: AdmissionConfig {
            max_concurrent_transactions: capacity,
        },
        ..Default::default()
    };
    config.router.missing_step = MissingStepPolicy::Simulate {
        min_delay_ms: 10,
        max_delay_ms: 20,
    };
    config.resilience.initial_backoff_ms = 1;
    config.resilience.max_backoff_ms = 2;
    config
}
