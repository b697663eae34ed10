//! End-to-end pipeline tests against a scripted in-memory backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use bulkfetch_core::aggregate::{ProgressCallback, ProgressUpdate};
use bulkfetch_core::backend::{AssetBackend, LocatorMap, RemoteItem};
use bulkfetch_core::config::{BreakerConfig, BulkfetchConfig, RetryConfig};
use bulkfetch_core::engine::Engine;
use bulkfetch_core::resilience::FetchError;
use bulkfetch_core::storage::PayloadStore;
use bulkfetch_core::task::{FailureKind, Task};

/// Scripted service double: per-id failure injection, rate-limit scripting,
/// and concurrency instrumentation.
#[derive(Default)]
struct ScriptedBackend {
    fetch_latency: Duration,
    /// Resolve calls to answer with a rate-limit signal before succeeding.
    rate_limited_resolves: AtomicU32,
    /// Ids that resolve to no locator.
    unresolved: HashSet<String>,
    /// Ids that fail with HTTP 500 this many times before succeeding.
    flaky: Mutex<HashMap<String, u32>>,
    /// Ids that fail with HTTP 500 forever.
    broken: HashSet<String>,
    /// Observed batch sizes, in call order.
    resolve_batches_seen: Mutex<Vec<usize>>,
    fetch_calls: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self::default()
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = latency;
        self
    }

    fn flaky_once(self, id: &str) -> Self {
        self.flaky.lock().unwrap().insert(id.to_string(), 1);
        self
    }

    fn fetch_count(&self, id: &str) -> u32 {
        self.fetch_calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn total_fetch_calls(&self) -> u32 {
        self.fetch_calls.lock().unwrap().values().sum()
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.resolve_batches_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetBackend for ScriptedBackend {
    async fn list_items(&self, _project: &str) -> Result<Vec<RemoteItem>, FetchError> {
        Ok(Vec::new())
    }

    async fn resolve_locators(
        &self,
        _project: &str,
        ids: &[String],
        _scale: f64,
    ) -> Result<LocatorMap, FetchError> {
        self.resolve_batches_seen.lock().unwrap().push(ids.len());
        if self.rate_limited_resolves.load(Ordering::SeqCst) > 0 {
            self.rate_limited_resolves.fetch_sub(1, Ordering::SeqCst);
            return Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_millis(60)),
            });
        }
        Ok(ids
            .iter()
            .map(|id| {
                let locator = (!self.unresolved.contains(id))
                    .then(|| format!("mock://cdn/{}.png", id));
                (id.clone(), locator)
            })
            .collect())
    }

    async fn fetch_payload(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        let id = locator
            .strip_prefix("mock://cdn/")
            .and_then(|rest| rest.strip_suffix(".png"))
            .unwrap_or(locator)
            .to_string();
        *self.fetch_calls.lock().unwrap().entry(id.clone()).or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.fetch_latency.is_zero() {
            tokio::time::sleep(self.fetch_latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.broken.contains(&id) {
            return Err(FetchError::Http { status: 500 });
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Http { status: 500 });
                }
            }
        }
        Ok(format!("payload:{}", id).into_bytes())
    }
}

fn fast_config(max_workers: usize, batch_size: usize) -> BulkfetchConfig {
    BulkfetchConfig {
        max_workers,
        batch_size,
        rate_limit_cooldown_secs: 1,
        retry: Some(RetryConfig {
            max_retries: 5,
            base_delay_secs: 0.002,
            multiplier: 2.0,
            max_delay_secs: 1,
        }),
        breaker: Some(BreakerConfig {
            threshold: 50,
            cooldown_secs: 60,
            half_open_success_threshold: 2,
        }),
        ..BulkfetchConfig::default()
    }
}

fn tasks(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| Task::new(format!("n{}", i), format!("asset {}", i), "assets").with_estimate(60.0))
        .collect()
}

fn engine_with(backend: Arc<ScriptedBackend>, cfg: BulkfetchConfig) -> (Engine, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = PayloadStore::new(tmp.path());
    let engine = Engine::new(cfg, backend as Arc<dyn AssetBackend>, store);
    (engine, tmp)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forty_two_tasks_three_batches_all_succeed_after_retries() {
    // 10% of tasks fail once with a retryable 500.
    let mut backend = ScriptedBackend::new().with_latency(Duration::from_millis(2));
    for i in (0..42).step_by(10) {
        backend = backend.flaky_once(&format!("n{}", i));
    }
    let backend = Arc::new(backend);
    let (engine, _tmp) = engine_with(Arc::clone(&backend), fast_config(8, 15));

    let report = engine.run("proj", tasks(42)).await;

    assert_eq!(report.submitted, 42);
    assert_eq!(report.succeeded, 42);
    assert_eq!(report.failed, 0);
    assert_eq!(report.succeeded + report.failed, report.submitted);
    assert_eq!(backend.batch_sizes(), vec![15, 15, 12]);
    assert!(
        backend.max_in_flight.load(Ordering::SeqCst) <= 8,
        "fetch concurrency exceeded the worker bound: {}",
        backend.max_in_flight.load(Ordering::SeqCst)
    );
    // Five flaky tasks retried exactly once each.
    assert_eq!(backend.total_fetch_calls(), 42 + 5);
    assert!(report.tasks_per_sec > 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_run_at_least_twice_as_fast_as_sequential() {
    let latency = Duration::from_millis(25);

    let backend = Arc::new(ScriptedBackend::new().with_latency(latency));
    let (engine, _tmp) = engine_with(Arc::clone(&backend), fast_config(8, 15));
    let parallel = engine.run("proj", tasks(42)).await;
    assert_eq!(parallel.succeeded, 42);

    let backend = Arc::new(ScriptedBackend::new().with_latency(latency));
    let (engine, _tmp) = engine_with(Arc::clone(&backend), fast_config(1, 15));
    let sequential = engine.run("proj", tasks(42)).await;
    assert_eq!(sequential.succeeded, 42);

    assert!(
        sequential.elapsed_secs >= 2.0 * parallel.elapsed_secs,
        "sequential {:.3}s not 2x slower than parallel {:.3}s",
        sequential.elapsed_secs,
        parallel.elapsed_secs
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partial_resolution_fails_only_missing_members() {
    let mut backend = ScriptedBackend::new();
    backend.unresolved.insert("n2".into());
    backend.unresolved.insert("n5".into());
    backend.unresolved.insert("n7".into());
    let backend = Arc::new(backend);
    let (engine, _tmp) = engine_with(Arc::clone(&backend), fast_config(4, 15));

    let report = engine.run("proj", tasks(10)).await;

    assert_eq!(report.submitted, 10);
    assert_eq!(report.succeeded, 7);
    assert_eq!(report.failed, 3);
    let unresolved: HashSet<String> = report
        .failed_tasks
        .iter()
        .map(|t| t.id.clone())
        .collect();
    assert_eq!(
        unresolved,
        HashSet::from(["n2".to_string(), "n5".to_string(), "n7".to_string()])
    );
    assert!(report
        .failed_tasks
        .iter()
        .all(|t| t.last_failure == Some(FailureKind::Unresolved)));
    // Unresolved tasks never reached the fetch stage.
    assert_eq!(backend.fetch_count("n2"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resubmission_failed_list_is_subset_of_original() {
    let mut backend = ScriptedBackend::new();
    backend.broken.insert("n1".into());
    backend.broken.insert("n4".into());
    let backend = Arc::new(backend);
    let (engine, _tmp) = engine_with(Arc::clone(&backend), fast_config(4, 15));

    let first = engine.run("proj", tasks(8)).await;
    assert_eq!(first.succeeded, 6);
    assert_eq!(first.failed, 2);
    let first_failed: HashSet<String> = first.failed_tasks.iter().map(|t| t.id.clone()).collect();

    let succeeded_calls_before = backend.fetch_count("n0");
    let second = engine.resubmit("proj", &first).await;
    let second_failed: HashSet<String> =
        second.failed_tasks.iter().map(|t| t.id.clone()).collect();

    assert_eq!(second.submitted, 2, "only the failed subset is resubmitted");
    assert!(second_failed.is_subset(&first_failed));
    // Previously succeeded tasks were not reprocessed.
    assert_eq!(backend.fetch_count("n0"), succeeded_calls_before);
    // Fresh attempt records, not mutated terminal ones.
    assert!(second.failed_tasks.iter().all(|t| t.attempt == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rate_limited_resolution_pauses_pool_then_retries_batch_once() {
    let backend = ScriptedBackend::new();
    backend.rate_limited_resolves.store(1, Ordering::SeqCst);
    let backend = Arc::new(backend);
    let (engine, _tmp) = engine_with(Arc::clone(&backend), fast_config(4, 15));

    let started = std::time::Instant::now();
    let report = engine.run("proj", tasks(6)).await;

    assert_eq!(report.succeeded, 6);
    // One throttled call plus exactly one post-cooldown retry.
    assert_eq!(backend.batch_sizes(), vec![6, 6]);
    assert!(
        started.elapsed() >= Duration::from_millis(55),
        "run did not honor the retry-after hint"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_circuit_defers_remaining_tasks_without_network_calls() {
    let mut backend = ScriptedBackend::new();
    for i in 0..6 {
        backend.broken.insert(format!("n{}", i));
    }
    let backend = Arc::new(backend);

    let mut cfg = fast_config(1, 15);
    cfg.retry = Some(RetryConfig {
        max_retries: 2,
        base_delay_secs: 0.001,
        multiplier: 2.0,
        max_delay_secs: 1,
    });
    cfg.breaker = Some(BreakerConfig {
        threshold: 2,
        cooldown_secs: 60,
        half_open_success_threshold: 2,
    });
    let (engine, _tmp) = engine_with(Arc::clone(&backend), cfg);

    let report = engine.run("proj", tasks(6)).await;
    assert_eq!(report.failed, 6);

    let kinds: Vec<FailureKind> = report
        .failed_tasks
        .iter()
        .filter_map(|t| t.last_failure)
        .collect();
    let transient = kinds.iter().filter(|k| **k == FailureKind::Transient).count();
    let deferred = kinds.iter().filter(|k| **k == FailureKind::Deferred).count();
    assert_eq!(transient, 2, "two tasks exhaust retries before the circuit trips");
    assert_eq!(deferred, 4, "the rest are deferred without touching the network");
    // 2 tasks x 2 attempts; deferred tasks made zero calls.
    assert_eq!(backend.total_fetch_calls(), 4);
    // Deferred failures remain resubmission candidates.
    assert!(report
        .failed_tasks
        .iter()
        .filter(|t| t.last_failure == Some(FailureKind::Deferred))
        .all(|t| t.last_failure.unwrap().resubmittable()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abort_prevents_new_work_but_reports_every_task() {
    let backend = Arc::new(ScriptedBackend::new());
    let (engine, _tmp) = engine_with(Arc::clone(&backend), fast_config(4, 5));

    engine.abort_signal().request_abort();
    let report = engine.run("proj", tasks(12)).await;

    assert_eq!(report.submitted, 12);
    assert_eq!(report.failed, 12);
    assert!(report
        .failed_tasks
        .iter()
        .all(|t| t.last_failure == Some(FailureKind::Aborted)));
    assert!(backend.batch_sizes().is_empty(), "no resolution after abort");
    assert_eq!(backend.total_fetch_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_progress_callback_does_not_stall_fetch_workers() {
    let backend = Arc::new(ScriptedBackend::new().with_latency(Duration::from_millis(5)));
    let tmp = tempfile::tempdir().unwrap();
    let store = PayloadStore::new(tmp.path());

    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_cb = Arc::clone(&delivered);
    let callback: ProgressCallback = Arc::new(move |_update: ProgressUpdate| {
        std::thread::sleep(Duration::from_millis(25));
        delivered_cb.fetch_add(1, Ordering::SeqCst);
    });

    let engine = Engine::new(
        fast_config(8, 15),
        Arc::clone(&backend) as Arc<dyn AssetBackend>,
        store,
    )
    .with_progress(callback);

    let report = engine.run("proj", tasks(16)).await;
    assert_eq!(report.succeeded, 16);
    // The fetch stage finished long before 16 x 25ms of callback time; a
    // stalled pool would push the recorded elapsed well past that.
    assert!(
        report.elapsed_secs < 0.25,
        "fetch stage appears stalled by the callback: {:.3}s",
        report.elapsed_secs
    );
    // Engine drains the callback worker before returning.
    assert_eq!(delivered.load(Ordering::SeqCst), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn payloads_land_partitioned_by_group_with_digest() {
    let backend = Arc::new(ScriptedBackend::new());
    let tmp = tempfile::tempdir().unwrap();
    let engine = Engine::new(
        fast_config(2, 15),
        Arc::clone(&backend) as Arc<dyn AssetBackend>,
        PayloadStore::new(tmp.path()),
    );

    let mut submitted = tasks(2);
    submitted[0].group = "icons".into();
    submitted[1].group = "covers".into();
    let report = engine.run("proj", submitted).await;

    assert_eq!(report.succeeded, 2);
    for result in &report.results {
        match &result.outcome {
            bulkfetch_core::task::FetchOutcome::Stored(stored) => {
                assert!(stored.path.exists());
                assert!(stored.bytes > 0);
                assert_eq!(stored.sha256.len(), 64);
                let group_dir = stored.path.parent().unwrap().file_name().unwrap();
                assert!(group_dir == "icons" || group_dir == "covers");
            }
            other => panic!("expected stored payload, got {:?}", other),
        }
    }
}
