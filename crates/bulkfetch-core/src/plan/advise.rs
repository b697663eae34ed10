//! Plan selection heuristics.

use crate::config::PlanConfig;
use crate::task::Task;

use super::{ExecutionPlan, Strategy};

/// Upper bound on workers regardless of configuration.
const HARD_WORKER_CAP: usize = 32;

/// Fraction of linear scaling a worker actually delivers.
const PARALLEL_EFFICIENCY: f64 = 0.72;

/// Fixed coordination cost of running the pool at all.
const COORDINATION_OVERHEAD: f64 = 0.05;

/// Isolation is skipped when its setup cost exceeds this share of the work.
const MAX_ISOLATION_OVERHEAD_RATIO: f64 = 0.10;

/// Produce an execution plan for `tasks`.
///
/// `max_workers` is the configured default ceiling; the hard cap applies on
/// top of it. This function never fails: missing estimates fall back to the
/// category lookup and then the configured default.
pub fn advise(tasks: &[Task], cfg: &PlanConfig, max_workers: usize) -> ExecutionPlan {
    let n = tasks.len();
    let mut reasoning = Vec::new();
    let mut warnings = Vec::new();

    if n < 2 {
        reasoning.push(format!(
            "{} task(s): too few tasks to amortize parallel overhead",
            n
        ));
        let estimated = tasks.first().map(|t| resolve_estimate(t, cfg)).unwrap_or(0.0);
        return ExecutionPlan {
            strategy: Strategy::Sequential,
            worker_count: 1,
            use_isolated_workspace: false,
            confidence: 0.9,
            expected_speedup: 1.0,
            estimated_duration_secs: estimated,
            reasoning,
            warnings,
        };
    }

    let estimates: Vec<f64> = tasks.iter().map(|t| resolve_estimate(t, cfg)).collect();
    let defaulted = tasks
        .iter()
        .filter(|t| {
            t.estimated_duration_secs.is_none() && !cfg.category_duration_secs.contains_key(&t.group)
        })
        .count();
    if defaulted > 0 {
        reasoning.push(format!(
            "{} task(s) without an estimate; assumed {:.0}s each",
            defaulted, cfg.default_duration_secs
        ));
    }

    let total: f64 = estimates.iter().sum();
    let per_task = total / n as f64;
    reasoning.push(format!(
        "{} tasks, {:.0}s estimated per task ({:.0}s total)",
        n, per_task, total
    ));

    if per_task < cfg.min_parallel_duration_secs {
        reasoning.push(format!(
            "per-task estimate below {:.0}s threshold: startup overhead would exceed the benefit",
            cfg.min_parallel_duration_secs
        ));
        let confidence = confidence_score(n, per_task, 1.0);
        return ExecutionPlan {
            strategy: Strategy::Sequential,
            worker_count: 1,
            use_isolated_workspace: false,
            confidence,
            expected_speedup: 1.0,
            estimated_duration_secs: total,
            reasoning,
            warnings,
        };
    }

    let worker_count = n.min(max_workers.max(1)).min(HARD_WORKER_CAP);
    reasoning.push(format!(
        "worker count {} = min(tasks {}, configured {}, cap {})",
        worker_count, n, max_workers, HARD_WORKER_CAP
    ));

    // Isolation pays off only for tasks that write a shared target, and only
    // when workspace setup stays a small share of the total work.
    let any_mutates = tasks.iter().any(|t| t.mutates_shared_target);
    let isolation_ratio = (cfg.isolation_setup_cost_secs * worker_count as f64) / total.max(1e-9);
    let isolate = if !any_mutates {
        reasoning.push("all tasks are read-only fetches: no workspace isolation needed".into());
        false
    } else if isolation_ratio > MAX_ISOLATION_OVERHEAD_RATIO {
        reasoning.push(format!(
            "isolation setup would cost {:.0}% of the run: skipping isolation",
            isolation_ratio * 100.0
        ));
        warnings.push(
            "no workspace isolation: ensure fetch targets do not collide".to_string(),
        );
        false
    } else {
        reasoning.push(format!(
            "tasks write shared targets and isolation costs only {:.1}%: isolating workspaces",
            isolation_ratio * 100.0
        ));
        true
    };

    let overhead = COORDINATION_OVERHEAD + if isolate { isolation_ratio } else { 0.0 };
    let expected_speedup =
        (n.min(worker_count) as f64 * PARALLEL_EFFICIENCY * (1.0 - overhead)).max(1.0);
    reasoning.push(format!(
        "expected speedup {:.2}x at {:.0}% efficiency, {:.0}% overhead",
        expected_speedup,
        PARALLEL_EFFICIENCY * 100.0,
        overhead * 100.0
    ));

    let confidence = confidence_score(n, per_task, expected_speedup);

    ExecutionPlan {
        strategy: if isolate {
            Strategy::ParallelIsolated
        } else {
            Strategy::ParallelShared
        },
        worker_count,
        use_isolated_workspace: isolate,
        confidence,
        expected_speedup,
        estimated_duration_secs: total / expected_speedup,
        reasoning,
        warnings,
    }
}

/// Explicit per-task estimate, else the category lookup, else the default.
fn resolve_estimate(task: &Task, cfg: &PlanConfig) -> f64 {
    task.estimated_duration_secs
        .or_else(|| cfg.category_duration_secs.get(&task.group).copied())
        .unwrap_or(cfg.default_duration_secs)
        .max(0.0)
}

/// Confidence starts conservative and earns increments from task count,
/// duration, and predicted speedup.
fn confidence_score(n: usize, per_task_secs: f64, speedup: f64) -> f64 {
    let mut c: f64 = 0.5;
    if n >= 2 {
        c += 0.1;
    }
    if n >= 4 {
        c += 0.05;
    }
    if per_task_secs >= 30.0 {
        c += 0.1;
    }
    if per_task_secs >= 60.0 {
        c += 0.05;
    }
    if speedup >= 1.5 {
        c += 0.1;
    }
    if speedup >= 2.5 {
        c += 0.05;
    }
    c.min(0.95)
}
