use crate::config::{MissingStepPolicy, RouterConfig};
use crate::domain::flow::{FlowGroup, FlowSpecification};
use crate::domain::ports::StepRef;
use crate::domain::variables::TransactionVariables;
use crate::error::{FailureKind, ProcessingError, Result};
use crate::infrastructure::registry::StepRegistry;
use dashmap::DashMap;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info, warn};

/// Aggregated figures for one step name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepStats {
    pub executions: u64,
    pub failures: u64,
    pub total_duration: Duration,
}

#[derive(Default)]
struct StepCounters {
    executions: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
}

impl StepCounters {
    fn stats(&self) -> StepStats {
        StepStats {
            executions: self.executions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_duration: Duration::from_micros(self.total_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Per-step and per-flow counters, shared by every transaction going through one router.
#[derive(Default)]
pub struct RouterMetrics {
    steps: DashMap<String, StepCounters>,
    sequential_flows: AtomicU64,
    parallel_flows: AtomicU64,
}

impl RouterMetrics {
    fn record_step(&self, name: &str, elapsed: Duration, failed: bool) {
        let counters = self.steps.entry(name.to_string()).or_default();
        counters.executions.fetch_add(1, Ordering::Relaxed);
        counters
            .total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if failed {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn step_stats(&self, name: &str) -> Option<StepStats> {
        self.steps.get(name).map(|counters| counters.stats())
    }

    pub fn all_step_stats(&self) -> BTreeMap<String, StepStats> {
        self.steps
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    /// Flows made only of sequential steps.
    pub fn sequential_flows(&self) -> u64 {
        self.sequential_flows.load(Ordering::Relaxed)
    }

    /// Flows containing at least one parallel batch.
    pub fn parallel_flows(&self) -> u64 {
        self.parallel_flows.load(Ordering::Relaxed)
    }
}

/// Interprets flow specifications and drives the named steps.
///
/// Groups run in source order. A sequential step must finish before anything after it starts.
/// A parallel batch is split into sub-batches of at most `batch_size` members; each sub-batch
/// is launched at once and fully joined before the next one (or the next group) begins. The
/// first failure observed in a sub-batch is returned once all its members have finished.
pub struct TaskRouter {
    registry: StepRegistry,
    batch_size: usize,
    missing_step: MissingStepPolicy,
    metrics: Arc<RouterMetrics>,
}

impl TaskRouter {
    pub fn new(registry: StepRegistry, config: &RouterConfig) -> Self {
        Self {
            registry,
            batch_size: config.batch_size.max(1),
            missing_step: config.missing_step,
            metrics: Arc::new(RouterMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub async fn execute(&self, flow: &str, vars: &TransactionVariables) -> Result<()> {
        let spec = FlowSpecification::parse(flow).inspect_err(|e| error!("{}", e))?;

        if spec.has_parallel() {
            self.metrics.parallel_flows.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.sequential_flows.fetch_add(1, Ordering::Relaxed);
        }
        info!(flow = %spec, steps = spec.step_count(), "Executing task flow");

        for group in spec.groups() {
            match group {
                FlowGroup::Sequential(name) => {
                    let step = self.registry.resolve(name);
                    run_step(
                        name.clone(),
                        step,
                        vars.clone(),
                        self.missing_step,
                        self.metrics.clone(),
                    )
                    .await?;
                }
                FlowGroup::Parallel(batch) => self.execute_parallel(batch, vars).await?,
            }
        }
        Ok(())
    }

    async fn execute_parallel(&self, batch: &[String], vars: &TransactionVariables) -> Result<()> {
        let total = batch.len();
        for (index, chunk) in batch.chunks(self.batch_size).enumerate() {
            let first = index * self.batch_size + 1;
            info!(
                "Processing batch of {} tasks ({}-{} of {})",
                chunk.len(),
                first,
                first + chunk.len() - 1,
                total
            );

            let launched = Instant::now();
            let mut members = LaunchedBatch::default();
            let mut names = HashMap::with_capacity(chunk.len());
            for name in chunk {
                let task = run_step(
                    name.clone(),
                    self.registry.resolve(name),
                    vars.clone(),
                    self.missing_step,
                    self.metrics.clone(),
                );
                let handle = members.0.spawn(task.instrument(Span::current()));
                names.insert(handle.id(), name.as_str());
            }

            let mut first_failure = None;
            while let Some(joined) = members.0.join_next().await {
                let outcome = joined.unwrap_or_else(|e| {
                    // A panicking member never reaches its own bookkeeping.
                    let name = names.get(&e.id()).copied().unwrap_or("<unknown>");
                    self.metrics.record_step(name, launched.elapsed(), true);
                    error!(step = %name, "Task did not complete: {}", e);
                    Err(ProcessingError::TaskFailed(format!("{}: {}", name, e)))
                });
                if let Err(e) = outcome {
                    first_failure.get_or_insert(e);
                }
            }
            if let Some(e) = first_failure {
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Members of a launched sub-batch run to completion even if the flow awaiting them is dropped.
#[derive(Default)]
struct LaunchedBatch(JoinSet<Result<()>>);

impl Drop for LaunchedBatch {
    fn drop(&mut self) {
        self.0.detach_all();
    }
}

async fn run_step(
    name: String,
    step: Option<StepRef>,
    vars: TransactionVariables,
    missing_step: MissingStepPolicy,
    metrics: Arc<RouterMetrics>,
) -> Result<()> {
    let started = Instant::now();
    let result = match step {
        Some(step) => step.run(&vars).await,
        None => match missing_step {
            MissingStepPolicy::Simulate {
                min_delay_ms,
                max_delay_ms,
            } => {
                warn!(step = %name, "No step registered - simulating execution");
                let delay = rand::thread_rng().gen_range(min_delay_ms..=max_delay_ms);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(())
            }
            MissingStepPolicy::Fail => Err(ProcessingError::UnknownStep(name.clone())),
        },
    };
    metrics.record_step(&name, started.elapsed(), result.is_err());

    match &result {
        Ok(()) => debug!(step = %name, "Task completed"),
        Err(e) if e.kind() == FailureKind::Business => warn!(step = %name, "Task rejected: {}", e),
        Err(e) => error!(step = %name, "Task failed: {}", e),
    }
    result
}
