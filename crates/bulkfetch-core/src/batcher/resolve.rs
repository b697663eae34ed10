//! Locator resolution: one service round trip per batch.

use tokio::sync::mpsc;

use crate::aggregate::Recorder;
use crate::backend::AssetBackend;
use crate::control::AbortSignal;
use crate::resilience::{run_with_retry, with_breaker, BreakerRegistry, PauseGate, RetryPolicy};
use crate::task::{FailureKind, Task, TaskStatus};

use super::Batch;

/// Breaker key for locator-resolution calls.
const OP_LOCATE: &str = "locate";

/// A task whose locator resolved; ready for the fetch pool.
#[derive(Debug)]
pub struct ResolvedFetch {
    pub task: Task,
    pub locator: String,
}

/// Resolve every batch in order, streaming resolved pairs to `resolved_tx`.
///
/// Failure is isolated per task: a partially resolved batch fails only its
/// unresolved members, and a failed resolution call fails only that batch's
/// tasks. Rate-limit signals pause the shared gate and the batch is retried
/// once after the cooldown (inside the resilience layer) before its members
/// are given up on. Every task handed in leaves with either a sent locator
/// or a recorded terminal failure.
pub async fn resolve_batches(
    batches: Vec<Batch>,
    project: &str,
    scale: f64,
    backend: &dyn AssetBackend,
    policy: &RetryPolicy,
    breakers: &BreakerRegistry,
    gate: &PauseGate,
    abort: &AbortSignal,
    recorder: &Recorder,
    resolved_tx: &mpsc::Sender<ResolvedFetch>,
) {
    let breaker = breakers.breaker(OP_LOCATE);
    let mut pipeline_closed = false;

    for batch in batches {
        if abort.is_aborted() || pipeline_closed {
            for task in batch.tasks {
                recorder.record_failure(task, FailureKind::Aborted, 0, 0.0);
            }
            continue;
        }

        let ids: Vec<String> = batch.tasks.iter().map(|t| t.resource.clone()).collect();
        tracing::debug!(batch = batch.index, ids = ids.len(), "resolving batch");

        let outcome = with_breaker(&breaker, || {
            run_with_retry(policy, gate, || backend.resolve_locators(project, &ids, scale))
        })
        .await;

        match outcome {
            Ok(locators) => {
                let mut unresolved = 0usize;
                for mut task in batch.tasks {
                    if pipeline_closed {
                        recorder.record_failure(task, FailureKind::Aborted, 0, 0.0);
                        continue;
                    }
                    match locators.get(&task.resource).and_then(|l| l.clone()) {
                        Some(locator) => {
                            task.status = TaskStatus::Batched;
                            if let Err(failed_send) =
                                resolved_tx.send(ResolvedFetch { task, locator }).await
                            {
                                // Executor is gone; nothing downstream will
                                // record these tasks, so close them out here.
                                tracing::warn!("fetch pipeline closed during resolution");
                                pipeline_closed = true;
                                recorder.record_failure(
                                    failed_send.0.task,
                                    FailureKind::Aborted,
                                    0,
                                    0.0,
                                );
                            }
                        }
                        None => {
                            unresolved += 1;
                            recorder.record_failure(task, FailureKind::Unresolved, 0, 0.0);
                        }
                    }
                }
                if unresolved > 0 {
                    tracing::warn!(
                        batch = batch.index,
                        unresolved,
                        "partial batch: some locators not resolved"
                    );
                }
            }
            Err(e) => {
                let kind = e.failure_kind();
                tracing::warn!(batch = batch.index, error = %e, "batch resolution failed");
                for task in batch.tasks {
                    recorder.record_failure(task, kind, 0, 0.0);
                }
            }
        }
    }
}
