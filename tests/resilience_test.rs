mod common;

use async_trait::async_trait;
use common::{FixedFlow, FlakyStep, test_config};
use flowgate::application::dispatcher::TransactionDispatcher;
use flowgate::application::pool::PoolKind;
use flowgate::application::resilience::{CircuitBreakerState, ResiliencePolicy};
use flowgate::config::ResilienceConfig;
use flowgate::domain::outcome::OutcomeStatus;
use flowgate::domain::ports::Step;
use flowgate::domain::transaction::TransactionRequest;
use flowgate::domain::variables::TransactionVariables;
use flowgate::error::{ProcessingError, Result};
use flowgate::infrastructure::registry::StepRegistry;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct SlowStep {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Step for SlowStep {
    async fn run(&self, _vars: &TransactionVariables) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_timeout_counts_as_system_failure_and_is_retried() {
    let mut config = test_config(4);
    config.resilience.timeout_ms = 20;
    config.resilience.max_attempts = 2;

    let calls = Arc::new(AtomicUsize::new(0));
    let registry = StepRegistry::builder()
        .register(
            "slow",
            SlowStep {
                calls: calls.clone(),
            },
        )
        .build();
    let dispatcher = TransactionDispatcher::new(&config, registry, Box::new(FixedFlow("slow")));

    let failure = dispatcher
        .process(TransactionRequest::new("PAYMENT", dec!(5)))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ProcessingError::Timeout(_)));
    assert_eq!(failure.status, OutcomeStatus::SystemError);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.performance_snapshot().available_capacity, 4);
}

#[tokio::test]
async fn test_business_errors_surface_while_breaker_is_open() {
    let mut config = test_config(4);
    config.resilience.max_attempts = 1;
    config.resilience.circuit_breaker.minimum_calls = 1;
    config.resilience.circuit_breaker.sliding_window_size = 1;

    let (flaky, _) = FlakyStep::new(usize::MAX);
    let registry = StepRegistry::builder().register("post", flaky).build();
    let dispatcher = TransactionDispatcher::new(&config, registry, Box::new(FixedFlow("post")));

    dispatcher
        .process(TransactionRequest::new("PAYMENT", dec!(5)))
        .await
        .unwrap_err();
    let pool = dispatcher.pools().get(PoolKind::HighThroughput);
    assert_eq!(pool.policy().breaker().state().await, CircuitBreakerState::Open);

    let failure = dispatcher
        .process(TransactionRequest {
            transaction_type: Some("PAYMENT".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(failure.status, OutcomeStatus::BusinessRuleViolation);
    assert_eq!(failure.business_code(), Some("INVALID_AMOUNT"));

    let failure = dispatcher
        .process(TransactionRequest::new("PAYMENT", dec!(5)))
        .await
        .unwrap_err();
    match &failure.error {
        ProcessingError::CircuitOpen { cause, .. } => {
            assert!(matches!(cause.as_deref(), Some(ProcessingError::Step { .. })));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_business_failures_never_trip_the_breaker() {
    let mut config = ResilienceConfig::default();
    config.circuit_breaker.minimum_calls = 1;
    config.circuit_breaker.sliding_window_size = 5;
    let policy = ResiliencePolicy::new("test", config);

    for _ in 0..50 {
        let _ = policy
            .execute(|| async {
                Err::<(), _>(ProcessingError::business("INVESTIGATION_INCOMPLETE", "pending"))
            })
            .await;
    }

    assert_eq!(policy.breaker().state().await, CircuitBreakerState::Closed);
    assert_eq!(policy.system_failures(), 0);
    assert_eq!(policy.business_failures(), 50);
}
