//! Run orchestration: plan, coordinate, execute, aggregate.
//!
//! The engine owns the long-lived shared state (breaker registry, pause
//! gate, abort signal) so circuit state spans runs, including resubmission
//! passes. Each run wires a fresh pipeline: coordinator and executor joined
//! by a bounded channel, both reporting into one recorder.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::aggregate::{AggregateReport, ProgressCallback, Recorder};
use crate::backend::AssetBackend;
use crate::batcher::{group_into_batches, resolve_batches};
use crate::config::BulkfetchConfig;
use crate::control::AbortSignal;
use crate::executor::{run_fetch_pool, ConnectionBudget};
use crate::plan::{advise, ExecutionPlan};
use crate::resilience::{BreakerRegistry, PauseGate};
use crate::storage::PayloadStore;
use crate::task::Task;

/// Batch retrieval engine. Build one per target service and reuse it across
/// runs; breaker state carries over so a resubmission pass sees the same
/// circuit a failing first pass left behind.
pub struct Engine {
    cfg: BulkfetchConfig,
    backend: Arc<dyn AssetBackend>,
    store: Arc<PayloadStore>,
    breakers: Arc<BreakerRegistry>,
    gate: Arc<PauseGate>,
    abort: AbortSignal,
    progress: Option<ProgressCallback>,
}

impl Engine {
    pub fn new(cfg: BulkfetchConfig, backend: Arc<dyn AssetBackend>, store: PayloadStore) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(cfg.breaker_settings()));
        let gate = Arc::new(PauseGate::new(cfg.rate_limit_cooldown()));
        Self {
            cfg,
            backend,
            store: Arc::new(store),
            breakers,
            gate,
            abort: AbortSignal::new(),
            progress: None,
        }
    }

    /// Install a per-completion progress callback. Invoked from a dedicated
    /// worker task; it may be arbitrarily slow without stalling fetches.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Token an operator can use to stop new work from starting.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn config(&self) -> &BulkfetchConfig {
        &self.cfg
    }

    /// Advisory plan for `tasks` without running anything.
    pub fn plan(&self, tasks: &[Task]) -> ExecutionPlan {
        advise(tasks, &self.cfg.plan_config(), self.cfg.max_workers)
    }

    /// Run the full pipeline over `tasks`. Always returns a report; partial
    /// failure shows up as a non-100% success rate, never as an error.
    pub async fn run(&self, project: &str, tasks: Vec<Task>) -> AggregateReport {
        if tasks.is_empty() {
            return AggregateReport::empty();
        }
        let plan = self.plan(&tasks);
        tracing::info!(tasks = tasks.len(), plan = %plan.summary(), "starting run");
        for line in &plan.reasoning {
            tracing::debug!("plan: {}", line);
        }
        for warning in &plan.warnings {
            tracing::warn!("plan: {}", warning);
        }
        self.execute(project, tasks, &plan).await
    }

    /// Feed a previous report's failed subset back through the pipeline.
    ///
    /// Only resubmittable failures are retried (a missing resource stays
    /// missing). Succeeded tasks are not rerun, so the new report's failed
    /// list can only be a subset of the previous one.
    pub async fn resubmit(&self, project: &str, previous: &AggregateReport) -> AggregateReport {
        let retries: Vec<Task> = previous
            .failed_tasks
            .iter()
            .filter(|t| t.last_failure.map(|k| k.resubmittable()).unwrap_or(true))
            .map(Task::retry_of)
            .collect();
        if retries.is_empty() {
            tracing::info!("nothing resubmittable in previous report");
            return AggregateReport::empty();
        }
        tracing::info!(tasks = retries.len(), "resubmitting failed subset");
        self.run(project, retries).await
    }

    async fn execute(
        &self,
        project: &str,
        tasks: Vec<Task>,
        plan: &ExecutionPlan,
    ) -> AggregateReport {
        let (recorder, progress_worker) = Recorder::new(tasks.len(), self.progress.clone());

        // Channel capacity of one batch keeps resolution at most one batch
        // ahead of the fetch stage (pipelining without unbounded buildup).
        let (resolved_tx, resolved_rx) = mpsc::channel(self.cfg.batch_size.max(1));
        let budget = Arc::new(ConnectionBudget::for_workers(plan.worker_count));

        let pool = tokio::spawn(run_fetch_pool(
            resolved_rx,
            plan.worker_count,
            plan.use_isolated_workspace,
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
            self.cfg.retry_policy(),
            Arc::clone(&self.breakers),
            Arc::clone(&self.gate),
            budget,
            self.abort.clone(),
            Arc::clone(&recorder),
        ));

        let batches = group_into_batches(tasks, self.cfg.batch_size);
        tracing::debug!(batches = batches.len(), "tasks grouped");
        resolve_batches(
            batches,
            project,
            self.cfg.scale,
            self.backend.as_ref(),
            &self.cfg.retry_policy(),
            &self.breakers,
            &self.gate,
            &self.abort,
            &recorder,
            &resolved_tx,
        )
        .await;
        drop(resolved_tx);

        if let Err(e) = pool.await {
            tracing::warn!("fetch pool join: {}", e);
        }
        let report = recorder.finalize();
        if let Some(worker) = progress_worker {
            let _ = worker.await;
        }

        tracing::info!(
            submitted = report.submitted,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_secs = report.elapsed_secs,
            "run complete"
        );
        report
    }
}
