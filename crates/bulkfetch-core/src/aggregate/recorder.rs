//! Shared recorder that fetch workers and the coordinator report into.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::storage::StoredPayload;
use crate::task::{FailureKind, FetchOutcome, FetchResult, Task, TaskStatus};

use super::{AggregateReport, ProgressCallback, ProgressUpdate};

/// Thread-safe outcome sink for one run.
///
/// `record_success` / `record_failure` are safe to call concurrently from
/// every worker; counters are atomic and the result list takes a short lock.
/// Progress updates go over an unbounded channel to a dedicated callback
/// worker (fire and continue), so a blocking callback cannot stall fetches.
pub struct Recorder {
    total: usize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    results: Mutex<Vec<FetchResult>>,
    failed_tasks: Mutex<Vec<Task>>,
    progress_tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    started: Instant,
}

impl Recorder {
    /// Create a recorder for `total` tasks. When a callback is supplied, the
    /// returned handle is the callback worker; await it after `finalize` to
    /// be sure the last update was delivered.
    pub fn new(
        total: usize,
        progress: Option<ProgressCallback>,
    ) -> (Arc<Self>, Option<JoinHandle<()>>) {
        let (progress_tx, worker) = match progress {
            Some(callback) => {
                let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
                let handle = tokio::spawn(async move {
                    while let Some(update) = rx.recv().await {
                        callback(update);
                    }
                });
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let recorder = Arc::new(Self {
            total,
            completed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            results: Mutex::new(Vec::with_capacity(total)),
            failed_tasks: Mutex::new(Vec::new()),
            progress_tx,
            started: Instant::now(),
        });
        (recorder, worker)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn is_done(&self) -> bool {
        self.completed() >= self.total
    }

    pub fn record_success(
        &self,
        mut task: Task,
        stored: StoredPayload,
        attempts: u32,
        elapsed_secs: f64,
    ) {
        task.status = TaskStatus::Succeeded;
        task.last_failure = None;
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        let result = FetchResult {
            task_id: task.id.clone(),
            name: task.name.clone(),
            group: task.group.clone(),
            outcome: FetchOutcome::Stored(stored),
            attempts,
            elapsed_secs,
        };
        self.push_result(result, task.name);
    }

    pub fn record_failure(
        &self,
        mut task: Task,
        kind: FailureKind,
        attempts: u32,
        elapsed_secs: f64,
    ) {
        task.status = TaskStatus::Failed;
        task.last_failure = Some(kind);
        tracing::debug!(task = %task.id, %kind, attempts, "task failed");
        self.failed.fetch_add(1, Ordering::Relaxed);
        let result = FetchResult {
            task_id: task.id.clone(),
            name: task.name.clone(),
            group: task.group.clone(),
            outcome: FetchOutcome::Failed(kind),
            attempts,
            elapsed_secs,
        };
        let name = task.name.clone();
        self.failed_tasks.lock().unwrap().push(task);
        self.push_result(result, name);
    }

    fn push_result(&self, result: FetchResult, name: String) {
        self.results.lock().unwrap().push(result);
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(tx) = &self.progress_tx {
            // Unbounded send never blocks; a dead worker just drops updates.
            let _ = tx.send(ProgressUpdate {
                completed,
                total: self.total,
                name,
            });
        }
    }

    /// Build the final report. Call once every task has reached a terminal
    /// state; consumes the recorder and closes the progress channel.
    pub fn finalize(self: Arc<Self>) -> AggregateReport {
        let recorder = match Arc::try_unwrap(self) {
            Ok(inner) => inner,
            Err(shared) => {
                // A straggler still holds a reference; snapshot instead.
                tracing::warn!("finalizing report while workers still hold the recorder");
                return shared.snapshot();
            }
        };
        drop(recorder.progress_tx);

        let elapsed_secs = recorder.started.elapsed().as_secs_f64();
        let succeeded = recorder.succeeded.into_inner();
        let failed = recorder.failed.into_inner();
        if succeeded + failed != recorder.total {
            tracing::warn!(
                succeeded,
                failed,
                submitted = recorder.total,
                "task accounting mismatch in final report"
            );
        }
        AggregateReport {
            submitted: recorder.total,
            succeeded,
            failed,
            elapsed_secs,
            tasks_per_sec: throughput(recorder.total, elapsed_secs),
            results: recorder.results.into_inner().unwrap(),
            failed_tasks: recorder.failed_tasks.into_inner().unwrap(),
        }
    }

    fn snapshot(&self) -> AggregateReport {
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        AggregateReport {
            submitted: self.total,
            succeeded,
            failed,
            elapsed_secs,
            tasks_per_sec: throughput(self.total, elapsed_secs),
            results: self.results.lock().unwrap().clone(),
            failed_tasks: self.failed_tasks.lock().unwrap().clone(),
        }
    }
}

fn throughput(tasks: usize, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    tasks as f64 / elapsed_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomic;

    fn stored() -> StoredPayload {
        StoredPayload {
            path: "out/icons/home-1_2.png".into(),
            bytes: 3,
            sha256: "abc".into(),
        }
    }

    #[tokio::test]
    async fn counts_add_up_and_failed_subset_collected() {
        let (recorder, worker) = Recorder::new(3, None);
        recorder.record_success(Task::new("1", "a", "g"), stored(), 1, 0.1);
        recorder.record_failure(Task::new("2", "b", "g"), FailureKind::Transient, 5, 0.4);
        recorder.record_failure(Task::new("3", "c", "g"), FailureKind::NotFound, 1, 0.1);
        assert!(recorder.is_done());

        let report = recorder.finalize();
        assert_eq!(report.submitted, 3);
        assert_eq!(report.succeeded + report.failed, report.submitted);
        assert_eq!(report.failed, 2);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failed_tasks.len(), 2);
        assert!(report
            .failed_tasks
            .iter()
            .all(|t| t.status == TaskStatus::Failed));
        assert!((report.success_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert!(worker.is_none());
    }

    #[tokio::test]
    async fn progress_callback_sees_every_completion() {
        let seen = Arc::new(StdAtomic::new(0));
        let seen_cb = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
            assert_eq!(update.total, 2);
        });

        let (recorder, worker) = Recorder::new(2, Some(callback));
        recorder.record_success(Task::new("1", "a", "g"), stored(), 1, 0.1);
        recorder.record_failure(Task::new("2", "b", "g"), FailureKind::Deferred, 0, 0.0);
        let _ = recorder.finalize();
        worker.unwrap().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
