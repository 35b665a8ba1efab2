use super::pool::{PoolKind, WorkerPools, select_pool};
use super::resilience::CircuitBreakerState;
use super::router::TaskRouter;
use crate::config::{DispatchConfig, EngineConfig};
use crate::domain::context::TransactionContext;
use crate::domain::outcome::{
    PerformanceSnapshot, TransactionFailure, TransactionOutcome, TransactionReceipt,
};
use crate::domain::ports::FlowResolverBox;
use crate::domain::transaction::TransactionRequest;
use crate::domain::variables::TransactionVariables;
use crate::error::{CAPACITY_EXCEEDED, FailureKind, ProcessingError, Result};
use crate::infrastructure::registry::StepRegistry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

/// Entry point for transactions.
///
/// Every submission must win a permit from a fixed-size pool; when none is left it is
/// rejected at once with a `CAPACITY_EXCEEDED` business violation. Accepted transactions are
/// tracked in the in-flight table, routed to a worker pool and run through the task router
/// under that pool's resilience policy. The permit and the table entry are released exactly
/// once when processing ends, whatever the outcome.
#[derive(Clone)]
pub struct TransactionDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    router: TaskRouter,
    flows: FlowResolverBox,
    pools: WorkerPools,
    dispatch: DispatchConfig,
    capacity: usize,
    permits: Arc<Semaphore>,
    in_flight: DashMap<String, TransactionContext>,
    sequence: AtomicU64,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Pending result of an accepted submission.
pub enum TransactionHandle {
    Spawned {
        transaction_id: String,
        handle: JoinHandle<TransactionOutcome>,
    },
    /// The selected pool was saturated and the work already ran on the submitting task.
    Completed(TransactionOutcome),
}

impl TransactionHandle {
    pub fn transaction_id(&self) -> &str {
        match self {
            Self::Spawned { transaction_id, .. } => transaction_id,
            Self::Completed(Ok(receipt)) => &receipt.transaction_id,
            Self::Completed(Err(failure)) => &failure.transaction_id,
        }
    }

    pub async fn outcome(self) -> TransactionOutcome {
        match self {
            Self::Completed(outcome) => outcome,
            Self::Spawned {
                transaction_id,
                handle,
            } => handle.await.unwrap_or_else(|join_error| {
                Err(TransactionFailure::new(
                    transaction_id,
                    ProcessingError::TaskFailed(join_error.to_string()),
                    Duration::ZERO,
                ))
            }),
        }
    }
}

/// Whether the dispatcher is taking new work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub available_capacity: usize,
    pub breakers: Vec<(PoolKind, CircuitBreakerState)>,
}

impl HealthReport {
    /// Healthy while a permit is free and at least one pool's breaker is not open.
    pub fn is_healthy(&self) -> bool {
        self.available_capacity > 0
            && self
                .breakers
                .iter()
                .any(|(_, state)| *state != CircuitBreakerState::Open)
    }
}

/// Releases the in-flight entry and the admission permit when dropped.
///
/// A guard dropped before its outcome was recorded (the task panicked or was aborted) counts
/// the transaction as failed.
struct InFlightGuard {
    inner: Arc<DispatcherInner>,
    transaction_id: String,
    settled: bool,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                transaction_id = %self.transaction_id,
                "Transaction task ended without an outcome"
            );
        }
        self.inner.in_flight.remove(&self.transaction_id);
    }
}

impl TransactionDispatcher {
    pub fn new(config: &EngineConfig, registry: StepRegistry, flows: FlowResolverBox) -> Self {
        let capacity = config.admission.max_concurrent_transactions;
        Self {
            inner: Arc::new(DispatcherInner {
                router: TaskRouter::new(registry, &config.router),
                flows,
                pools: WorkerPools::new(&config.pools, &config.resilience),
                dispatch: config.dispatch.clone(),
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                in_flight: DashMap::new(),
                sequence: AtomicU64::new(1),
                total: AtomicU64::new(0),
                successful: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    pub fn router(&self) -> &TaskRouter {
        &self.inner.router
    }

    pub fn pools(&self) -> &WorkerPools {
        &self.inner.pools
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Accepts a request and starts processing it without waiting for the result.
    ///
    /// Fails immediately, without queueing, when no admission permit is available.
    pub async fn submit(
        &self,
        request: TransactionRequest,
    ) -> std::result::Result<TransactionHandle, TransactionFailure> {
        let transaction_id = self.inner.next_transaction_id();

        let Ok(permit) = self.inner.permits.clone().try_acquire_owned() else {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                transaction_id = %transaction_id,
                "Rejecting transaction, system is at maximum capacity"
            );
            return Err(TransactionFailure::new(
                transaction_id,
                ProcessingError::business(CAPACITY_EXCEEDED, "System is at maximum capacity"),
                Duration::ZERO,
            ));
        };

        self.inner.in_flight.insert(
            transaction_id.clone(),
            TransactionContext::new(transaction_id.clone(), request.clone()),
        );
        self.inner.total.fetch_add(1, Ordering::Relaxed);
        let guard = InFlightGuard {
            inner: self.inner.clone(),
            transaction_id: transaction_id.clone(),
            settled: false,
            _permit: permit,
        };

        let pool = select_pool(&request, &self.inner.dispatch);
        let span = info_span!(
            "transaction",
            transaction_id = %transaction_id,
            transaction_type = request.transaction_type.as_deref().unwrap_or_default(),
            amount = %request.amount.unwrap_or_default(),
            pool = %pool,
        );

        let inner = self.inner.clone();
        let id = transaction_id.clone();
        let task = async move {
            let mut guard = guard;
            let outcome = inner.process(&id, &request, pool).await;
            guard.settled = true;
            outcome
        }
        .instrument(span);

        match self.inner.pools.get(pool).try_spawn(task) {
            Ok(handle) => Ok(TransactionHandle::Spawned {
                transaction_id,
                handle,
            }),
            Err(task) => Ok(TransactionHandle::Completed(task.await)),
        }
    }

    /// Submits a request and waits for its outcome.
    pub async fn process(&self, request: TransactionRequest) -> TransactionOutcome {
        self.submit(request).await?.outcome().await
    }

    pub fn performance_snapshot(&self) -> PerformanceSnapshot {
        let inner = &self.inner;
        PerformanceSnapshot {
            total_transactions: inner.total.load(Ordering::Relaxed),
            successful_transactions: inner.successful.load(Ordering::Relaxed),
            failed_transactions: inner.failed.load(Ordering::Relaxed),
            rejected_transactions: inner.rejected.load(Ordering::Relaxed),
            active_transactions: inner.in_flight.len(),
            available_capacity: inner.permits.available_permits(),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let mut breakers = Vec::with_capacity(PoolKind::ALL.len());
        for pool in self.inner.pools.iter() {
            breakers.push((pool.kind(), pool.policy().breaker().state().await));
        }
        HealthReport {
            available_capacity: self.inner.permits.available_permits(),
            breakers,
        }
    }

    pub fn is_in_flight(&self, transaction_id: &str) -> bool {
        self.inner.in_flight.contains_key(transaction_id)
    }

    /// Copy of the context of an in-flight transaction.
    pub fn context(&self, transaction_id: &str) -> Option<TransactionContext> {
        self.inner
            .in_flight
            .get(transaction_id)
            .map(|entry| entry.value().clone())
    }
}

impl DispatcherInner {
    fn next_transaction_id(&self) -> String {
        format!(
            "TXN-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            self.sequence.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn update_context<R>(
        &self,
        transaction_id: &str,
        f: impl FnOnce(&mut TransactionContext) -> R,
    ) -> Option<R> {
        self.in_flight
            .get_mut(transaction_id)
            .map(|mut entry| f(entry.value_mut()))
    }

    async fn process(
        &self,
        transaction_id: &str,
        request: &TransactionRequest,
        pool: PoolKind,
    ) -> TransactionOutcome {
        info!("Processing transaction");

        match self.run_flow(transaction_id, request, pool).await {
            Ok(result) => {
                let elapsed = self
                    .update_context(transaction_id, |ctx| {
                        ctx.mark_processing_complete();
                        ctx.elapsed()
                    })
                    .unwrap_or_default();
                self.successful.fetch_add(1, Ordering::Relaxed);
                info!("Successfully processed transaction in {:?}", elapsed);
                Ok(TransactionReceipt {
                    transaction_id: transaction_id.to_string(),
                    result,
                    elapsed,
                })
            }
            Err(err) => {
                let elapsed = self
                    .update_context(transaction_id, |ctx| {
                        ctx.mark_processing_failed(&err);
                        ctx.elapsed()
                    })
                    .unwrap_or_default();
                self.failed.fetch_add(1, Ordering::Relaxed);
                match err.kind() {
                    FailureKind::System => {
                        error!("Transaction failed after {:?}: {}", elapsed, err)
                    }
                    _ => warn!("Transaction rejected after {:?}: {}", elapsed, err),
                }
                Err(TransactionFailure::new(
                    transaction_id.to_string(),
                    err,
                    elapsed,
                ))
            }
        }
    }

    async fn run_flow(
        &self,
        transaction_id: &str,
        request: &TransactionRequest,
        pool: PoolKind,
    ) -> Result<String> {
        let validated = request.validate()?;
        self.update_context(transaction_id, |ctx| ctx.mark_validation_complete());

        let flow = self
            .flows
            .resolve_flow(validated.transaction_type, request)?;
        let vars = TransactionVariables::from_request(request);
        vars.set("transactionId", transaction_id);
        vars.set("pool", pool.as_str());

        let router = &self.router;
        let (flow, bag) = (flow.as_str(), &vars);
        self.pools
            .get(pool)
            .policy()
            .execute(|| router.execute(flow, bag))
            .await
            .inspect_err(|err| vars.record_failure(err))?;

        Ok(validated.transaction_type.success_token(transaction_id))
    }
}
