//! `bulkfetch run` – fetch a task set and print the report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use bulkfetch_core::aggregate::{AggregateReport, ProgressCallback, ProgressUpdate};
use bulkfetch_core::config;
use bulkfetch_core::engine::Engine;
use bulkfetch_core::storage::PayloadStore;
use bulkfetch_core::task::FailureKind;

use crate::cli::SourceArgs;

use super::{backend_arc, load_tasks};

pub async fn run_export(
    source: SourceArgs,
    out: PathBuf,
    workers: Option<usize>,
    retry_failed: bool,
) -> Result<()> {
    let mut cfg = config::load_or_init()?;
    if let Some(workers) = workers {
        cfg.max_workers = workers.max(1);
    }

    let backend = backend_arc(&source, &cfg);
    let tasks = load_tasks(&source, backend.as_ref()).await?;
    if tasks.is_empty() {
        println!("Nothing to fetch.");
        return Ok(());
    }
    println!("{} task(s) to fetch into {}", tasks.len(), out.display());

    let progress: ProgressCallback = Arc::new(|update: ProgressUpdate| {
        println!("  [{}/{}] {}", update.completed, update.total, update.name);
    });
    let engine = Engine::new(cfg, backend, PayloadStore::new(out)).with_progress(progress);

    let report = engine.run(&source.project, tasks).await;
    print_report(&report);

    if retry_failed && !report.failed_tasks.is_empty() {
        println!("\nRetrying failed subset...");
        let second = engine.resubmit(&source.project, &report).await;
        print_report(&second);
    }
    Ok(())
}

fn print_report(report: &AggregateReport) {
    println!(
        "\n{} submitted, {} succeeded, {} failed ({:.0}% success) in {:.1}s ({:.1} tasks/s)",
        report.submitted,
        report.succeeded,
        report.failed,
        report.success_rate() * 100.0,
        report.elapsed_secs,
        report.tasks_per_sec
    );
    if report.failed_tasks.is_empty() {
        return;
    }
    println!("Failed tasks:");
    for task in &report.failed_tasks {
        let reason = task
            .last_failure
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let hint = match task.last_failure {
            Some(kind) if kind.resubmittable() => " (resubmittable)",
            _ => "",
        };
        println!("  {} ({}): {}{}", task.id, task.name, reason, hint);
    }
    let deferred = report
        .failed_tasks
        .iter()
        .filter(|t| t.last_failure == Some(FailureKind::Deferred))
        .count();
    if deferred > 0 {
        println!(
            "{} task(s) were deferred while the service was unavailable; run with --retry-failed.",
            deferred
        );
    }
}
