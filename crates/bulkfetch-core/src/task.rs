//! Task lifecycle types: what we fetch, where it stands, how it ended.

use serde::Serialize;

use crate::storage::StoredPayload;

/// Lifecycle of a single retrieval task.
///
/// Stages are strictly ordered per task: Pending -> Batched -> Fetching ->
/// Succeeded | Failed. Succeeded and Failed are terminal for a run; a
/// resubmission builds a fresh Pending task instead of mutating a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    /// Submitted, not yet grouped into a batch.
    Pending,
    /// Locator resolved; waiting for a fetch worker.
    Batched,
    /// Payload retrieval in flight.
    Fetching,
    Succeeded,
    Failed,
}

/// Classification of a terminal failure, surfaced in the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Network-level failure that was retried until the policy gave up.
    Transient,
    /// The service signalled throttling and the pool-wide cooldown did not clear it.
    RateLimited,
    /// The remote resource does not exist; never retried.
    NotFound,
    /// The circuit for this operation was open; the call never reached the
    /// network. A good candidate for a later resubmission pass.
    Deferred,
    /// The batch resolution response carried no locator for this task.
    Unresolved,
    /// Payload could not be persisted to the storage sink.
    Storage,
    /// Response body could not be decoded.
    Decode,
    /// The run was aborted before this task started.
    Aborted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient network failure, retries exhausted",
            FailureKind::RateLimited => "rate limited",
            FailureKind::NotFound => "resource not found",
            FailureKind::Deferred => "deferred: dependency unavailable",
            FailureKind::Unresolved => "locator not resolved",
            FailureKind::Storage => "storage write failed",
            FailureKind::Decode => "response decode failed",
            FailureKind::Aborted => "aborted before start",
        };
        f.write_str(s)
    }
}

impl FailureKind {
    /// True for failures worth feeding back through a resubmission pass.
    pub fn resubmittable(&self) -> bool {
        !matches!(self, FailureKind::NotFound | FailureKind::Decode)
    }
}

/// One unit of work: a single remote asset to retrieve.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique task identifier within a run.
    pub id: String,
    /// Remote item id sent to the locator-resolution call.
    pub resource: String,
    /// Human-readable name, used for progress output and the stored filename.
    pub name: String,
    /// Group/category key; also the storage partition.
    pub group: String,
    pub status: TaskStatus,
    /// Number of full pipeline passes this task has been through (0 on first
    /// submission; incremented by resubmission).
    pub attempt: u32,
    pub last_failure: Option<FailureKind>,
    /// Caller-supplied estimate in seconds; falls back to the category lookup.
    pub estimated_duration_secs: Option<f64>,
    /// Set by the caller when this task writes to a target other tasks may
    /// also touch. Drives the advisor's isolation decision.
    pub mutates_shared_target: bool,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, group: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            resource: id.clone(),
            id,
            name: name.into(),
            group: group.into(),
            status: TaskStatus::Pending,
            attempt: 0,
            last_failure: None,
            estimated_duration_secs: None,
            mutates_shared_target: false,
        }
    }

    pub fn with_estimate(mut self, secs: f64) -> Self {
        self.estimated_duration_secs = Some(secs);
        self
    }

    pub fn with_shared_target(mut self, mutates: bool) -> Self {
        self.mutates_shared_target = mutates;
        self
    }

    /// Fresh Pending task for a resubmission pass. Carries the attempt count
    /// and last classification forward so the audit trail survives; the
    /// terminal record from the previous run is left untouched.
    pub fn retry_of(failed: &Task) -> Self {
        Self {
            id: failed.id.clone(),
            resource: failed.resource.clone(),
            name: failed.name.clone(),
            group: failed.group.clone(),
            status: TaskStatus::Pending,
            attempt: failed.attempt + 1,
            last_failure: failed.last_failure,
            estimated_duration_secs: failed.estimated_duration_secs,
            mutates_shared_target: failed.mutates_shared_target,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// Terminal outcome of one task within one run.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Stored(StoredPayload),
    Failed(FailureKind),
}

/// One terminal record per submitted task. Accumulated by the aggregator.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub task_id: String,
    pub name: String,
    pub group: String,
    pub outcome: FetchOutcome,
    /// Network attempts spent on this task in this run.
    pub attempts: u32,
    pub elapsed_secs: f64,
}

impl FetchResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Stored(_))
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match self.outcome {
            FetchOutcome::Failed(kind) => Some(kind),
            FetchOutcome::Stored(_) => None,
        }
    }
}
