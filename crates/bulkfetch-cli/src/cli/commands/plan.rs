//! `bulkfetch plan` – print the advisor's execution plan without fetching.

use anyhow::Result;

use bulkfetch_core::config;
use bulkfetch_core::engine::Engine;
use bulkfetch_core::storage::PayloadStore;

use crate::cli::SourceArgs;

use super::{backend_arc, load_tasks};

pub async fn run_plan(source: SourceArgs) -> Result<()> {
    let cfg = config::load_or_init()?;
    let backend = backend_arc(&source, &cfg);
    let tasks = load_tasks(&source, backend.as_ref()).await?;

    // The store is never written to by `plan`; any path will do.
    let engine = Engine::new(cfg, backend, PayloadStore::new("export"));
    let plan = engine.plan(&tasks);

    println!("{}", plan.summary());
    println!(
        "estimated duration {:.0}s, isolated workspace: {}",
        plan.estimated_duration_secs, plan.use_isolated_workspace
    );
    println!("\nReasoning:");
    for line in &plan.reasoning {
        println!("  - {}", line);
    }
    if !plan.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &plan.warnings {
            println!("  ! {}", warning);
        }
    }
    Ok(())
}
