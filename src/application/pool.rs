use super::resilience::ResiliencePolicy;
use crate::config::{DispatchConfig, PoolConfig, PoolsConfig, ResilienceConfig};
use crate::domain::transaction::{TransactionRequest, TransactionType};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    HighThroughput,
    Batch,
    Priority,
}

impl PoolKind {
    pub const ALL: [PoolKind; 3] = [Self::HighThroughput, Self::Batch, Self::Priority];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighThroughput => "high-throughput",
            Self::Batch => "batch",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chooses the pool a request runs on.
///
/// High-value amounts and VIP card holders go to the priority pool. Adjustments and refunds
/// tolerate latency and go to the batch pool. Everything else, including requests whose type
/// does not parse, uses the high-throughput pool.
pub fn select_pool(request: &TransactionRequest, config: &DispatchConfig) -> PoolKind {
    let high_value = request
        .amount
        .is_some_and(|amount| amount > config.priority_amount_threshold);
    let marker = config.vip_marker.trim().to_lowercase();
    let vip = !marker.is_empty()
        && request
            .holder_name()
            .is_some_and(|name| name.to_lowercase().contains(&marker));
    if high_value || vip {
        return PoolKind::Priority;
    }
    match request.parsed_type() {
        Some(TransactionType::Adjustment | TransactionType::Refund) => PoolKind::Batch,
        _ => PoolKind::HighThroughput,
    }
}

/// A bounded bulkhead: `max_workers` tasks run at once and up to `queue_capacity` more wait.
///
/// When both are exhausted, [`WorkerPool::try_spawn`] hands the task back so the caller can
/// run it itself.
pub struct WorkerPool {
    kind: PoolKind,
    max_workers: usize,
    slots: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    policy: ResiliencePolicy,
    caller_runs: AtomicU64,
}

impl WorkerPool {
    pub fn new(kind: PoolKind, config: &PoolConfig, resilience: &ResilienceConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            kind,
            max_workers,
            slots: Arc::new(Semaphore::new(max_workers + config.queue_capacity)),
            workers: Arc::new(Semaphore::new(max_workers)),
            policy: ResiliencePolicy::new(kind.as_str(), resilience.clone()),
            caller_runs: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    /// Tasks currently holding a worker.
    pub fn active_workers(&self) -> usize {
        self.max_workers - self.workers.available_permits()
    }

    /// Number of submissions that found the pool saturated and ran on the caller.
    pub fn caller_runs(&self) -> u64 {
        self.caller_runs.load(Ordering::Relaxed)
    }

    /// Spawns `task` on the pool, or returns it untouched when the pool and its queue are full.
    pub fn try_spawn<F>(&self, task: F) -> Result<JoinHandle<F::Output>, F>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let Ok(slot) = self.slots.clone().try_acquire_owned() else {
            self.caller_runs.fetch_add(1, Ordering::Relaxed);
            debug!(pool = %self.kind, "Pool saturated, running on caller");
            return Err(task);
        };
        let workers = self.workers.clone();
        let handle = tokio::spawn(
            async move {
                let _slot = slot;
                // The worker semaphore is never closed.
                let _worker = workers.acquire_owned().await.ok();
                task.await
            }
            .instrument(Span::current()),
        );
        Ok(handle)
    }
}

/// The three pools owned by one dispatcher.
pub struct WorkerPools {
    high_throughput: WorkerPool,
    batch: WorkerPool,
    priority: WorkerPool,
}

impl WorkerPools {
    pub fn new(config: &PoolsConfig, resilience: &ResilienceConfig) -> Self {
        Self {
            high_throughput: WorkerPool::new(
                PoolKind::HighThroughput,
                &config.high_throughput,
                resilience,
            ),
            batch: WorkerPool::new(PoolKind::Batch, &config.batch, resilience),
            priority: WorkerPool::new(PoolKind::Priority, &config.priority, resilience),
        }
    }

    pub fn get(&self, kind: PoolKind) -> &WorkerPool {
        match kind {
            PoolKind::HighThroughput => &self.high_throughput,
            PoolKind::Batch => &self.batch,
            PoolKind::Priority => &self.priority,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerPool> {
        PoolKind::ALL.into_iter().map(|kind| self.get(kind))
    }
}
