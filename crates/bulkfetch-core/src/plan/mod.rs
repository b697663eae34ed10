//! Strategy advisor: decides whether and how aggressively to parallelize a
//! task set before the pipeline starts.
//!
//! The advisor runs once per submission, never fails (absent data degrades to
//! a conservative sequential plan), and its output configures both the
//! coordinator and the executor.

mod advise;

pub use advise::advise;

use serde::Serialize;

/// Execution strategy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    /// One worker; parallel overhead would not amortize.
    Sequential,
    /// Bounded worker pool sharing one workspace.
    ParallelShared,
    /// Bounded worker pool with per-worker staging workspaces.
    ParallelIsolated,
}

/// Immutable concurrency plan produced by [`advise`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub strategy: Strategy,
    pub worker_count: usize,
    pub use_isolated_workspace: bool,
    /// How sure the advisor is, in [0, 1].
    pub confidence: f64,
    /// Predicted speedup over a sequential run; never below 1.0.
    pub expected_speedup: f64,
    /// Predicted wall-clock for the whole run, seconds.
    pub estimated_duration_secs: f64,
    /// Ordered, human-readable decision trail.
    pub reasoning: Vec<String>,
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    pub fn is_parallel(&self) -> bool {
        self.worker_count > 1
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{:?}: {} worker(s), {:.1}x expected speedup, confidence {:.0}%",
            self.strategy,
            self.worker_count,
            self.expected_speedup,
            self.confidence * 100.0
        )
    }
}
