//! Concurrent fetch executor.
//!
//! Retrieves the payload for every resolved task with a bounded pool of
//! workers sized by the execution plan. Each fetch goes through the
//! resilience layer (breaker check, then retry with backoff), draws a
//! connection from the shared budget around the network call only, and
//! persists its payload to a destination keyed by task id. Failures are
//! isolated per task; nothing here aborts siblings or the pool.

mod budget;

pub use budget::{ConnectionBudget, ConnectionSlot};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::aggregate::Recorder;
use crate::backend::AssetBackend;
use crate::batcher::ResolvedFetch;
use crate::control::AbortSignal;
use crate::resilience::{run_with_retry, with_breaker, BreakerRegistry, PauseGate, RetryPolicy};
use crate::storage::{extension_from_locator, PayloadStore};
use crate::task::{FailureKind, TaskStatus};

/// Breaker key for payload downloads.
const OP_FETCH: &str = "fetch";

/// Everything a fetch worker needs, shared across the pool.
struct WorkerCtx {
    backend: Arc<dyn AssetBackend>,
    store: Arc<PayloadStore>,
    policy: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
    gate: Arc<PauseGate>,
    budget: Arc<ConnectionBudget>,
    recorder: Arc<Recorder>,
    isolated_workspace: bool,
}

/// Drain `resolved_rx`, keeping up to `worker_count` fetches in flight until
/// the coordinator closes the channel and the last worker finishes.
///
/// New work is deferred while the pause gate is closed and refused once the
/// abort signal is set; tasks refused after abort still get a terminal
/// record so the report stays complete.
#[allow(clippy::too_many_arguments)]
pub async fn run_fetch_pool(
    mut resolved_rx: mpsc::Receiver<ResolvedFetch>,
    worker_count: usize,
    isolated_workspace: bool,
    backend: Arc<dyn AssetBackend>,
    store: Arc<PayloadStore>,
    policy: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
    gate: Arc<PauseGate>,
    budget: Arc<ConnectionBudget>,
    abort: AbortSignal,
    recorder: Arc<Recorder>,
) {
    let worker_count = worker_count.max(1);
    let ctx = Arc::new(WorkerCtx {
        backend,
        store,
        policy,
        breakers,
        gate,
        budget,
        recorder,
        isolated_workspace,
    });

    let mut join_set = JoinSet::new();
    let mut next_slot = 0usize;

    while let Some(resolved) = resolved_rx.recv().await {
        // Backpressure: never more than worker_count fetches in flight.
        while join_set.len() >= worker_count {
            join_one(&mut join_set).await;
        }

        if abort.is_aborted() {
            ctx.recorder
                .record_failure(resolved.task, FailureKind::Aborted, 0, 0.0);
            continue;
        }
        ctx.gate.wait_until_clear().await;

        let ctx = Arc::clone(&ctx);
        let slot = next_slot;
        next_slot = (next_slot + 1) % worker_count;
        join_set.spawn(async move { fetch_one(ctx, resolved, slot).await });
    }

    while !join_set.is_empty() {
        join_one(&mut join_set).await;
    }
}

async fn join_one(join_set: &mut JoinSet<()>) {
    if let Some(Err(e)) = join_set.join_next().await {
        // Worker bodies record their own outcomes; a join error means a panic.
        tracing::warn!("fetch worker join: {}", e);
    }
}

/// One task: resilient download, then persist, then record.
async fn fetch_one(ctx: Arc<WorkerCtx>, resolved: ResolvedFetch, slot: usize) {
    let ResolvedFetch { mut task, locator } = resolved;
    task.status = TaskStatus::Fetching;
    let started = Instant::now();
    let attempts = AtomicU32::new(0);

    let breaker = ctx.breakers.breaker(OP_FETCH);
    let downloaded = with_breaker(&breaker, || {
        run_with_retry(&ctx.policy, &ctx.gate, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            let backend = Arc::clone(&ctx.backend);
            let budget = Arc::clone(&ctx.budget);
            let locator = locator.clone();
            async move {
                // Hold a connection for the network call only, not for the
                // persist that follows.
                let _conn = budget.acquire().await;
                backend.fetch_payload(&locator).await
            }
        })
    })
    .await;

    let attempts = attempts.load(Ordering::Relaxed);
    match downloaded {
        Ok(bytes) => {
            let store = Arc::clone(&ctx.store);
            let ext = extension_from_locator(&locator);
            let workspace = ctx.isolated_workspace.then_some(slot);
            let (group, id, name) = (task.group.clone(), task.id.clone(), task.name.clone());
            let persisted = tokio::task::spawn_blocking(move || {
                store.persist(&group, &id, &name, &ext, &bytes, workspace)
            })
            .await;

            let elapsed = started.elapsed().as_secs_f64();
            match persisted {
                Ok(Ok(stored)) => ctx.recorder.record_success(task, stored, attempts, elapsed),
                Ok(Err(e)) => {
                    tracing::warn!(task = %task.id, error = %e, "persist failed");
                    ctx.recorder
                        .record_failure(task, e.failure_kind(), attempts, elapsed);
                }
                Err(join_err) => {
                    tracing::warn!(task = %task.id, "persist worker join: {}", join_err);
                    ctx.recorder
                        .record_failure(task, FailureKind::Storage, attempts, elapsed);
                }
            }
        }
        Err(e) => {
            // CircuitOpen classifies as Deferred: the call never reached the
            // network, which makes the task a resubmission candidate rather
            // than evidence of a permanent fault.
            let elapsed = started.elapsed().as_secs_f64();
            ctx.recorder
                .record_failure(task, e.failure_kind(), attempts, elapsed);
        }
    }
}
