//! Subcommand implementations.

mod plan;
mod run;

pub use plan::run_plan;
pub use run::run_export;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use bulkfetch_core::backend::{AssetBackend, HttpBackend};
use bulkfetch_core::config::BulkfetchConfig;
use bulkfetch_core::task::Task;

use super::SourceArgs;

/// One entry in a task manifest file.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: String,
    name: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    estimated_duration_secs: Option<f64>,
    #[serde(default)]
    mutates_shared_target: bool,
}

/// Build the HTTP backend from CLI args, config, and the environment
/// (`BULKFETCH_TOKEN` for the API token).
fn build_backend(source: &SourceArgs, cfg: &BulkfetchConfig) -> HttpBackend {
    let token = std::env::var("BULKFETCH_TOKEN").ok().filter(|t| !t.is_empty());
    if token.is_none() {
        tracing::debug!("BULKFETCH_TOKEN not set; calling the service unauthenticated");
    }
    HttpBackend::new(source.base_url.clone(), token)
        .with_timeouts(cfg.metadata_timeout(), cfg.download_timeout())
}

/// Task set from the manifest file when given, else the project's structure
/// listing.
pub(super) async fn load_tasks(
    source: &SourceArgs,
    backend: &dyn AssetBackend,
) -> Result<Vec<Task>> {
    match &source.manifest {
        Some(path) => tasks_from_manifest(path),
        None => {
            let items = backend
                .list_items(&source.project)
                .await
                .with_context(|| format!("list items for project {}", source.project))?;
            Ok(items
                .into_iter()
                .map(|item| Task::new(item.id, item.name, item.group))
                .collect())
        }
    }
}

fn tasks_from_manifest(path: &Path) -> Result<Vec<Task>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("read manifest: {}", path.display()))?;
    let entries: Vec<ManifestEntry> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse manifest JSON: {}", path.display()))?;
    Ok(entries
        .into_iter()
        .map(|e| {
            let mut task =
                Task::new(e.id, e.name, e.group).with_shared_target(e.mutates_shared_target);
            if let Some(secs) = e.estimated_duration_secs {
                task = task.with_estimate(secs);
            }
            task
        })
        .collect())
}

/// Shared helper so `run` and `plan` agree on backend construction.
pub(super) fn backend_arc(source: &SourceArgs, cfg: &BulkfetchConfig) -> Arc<dyn AssetBackend> {
    Arc::new(build_backend(source, cfg))
}
