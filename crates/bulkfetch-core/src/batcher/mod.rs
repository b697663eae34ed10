//! Batch request coordinator.
//!
//! Groups pending tasks into size-bounded batches preserving submission
//! order, resolves each batch to per-task fetch locators in one round trip
//! through the resilience layer, and streams resolved pairs to the fetch
//! executor. Resolution for a later batch may overlap the fetch stage of an
//! earlier one; the pipeline channel provides the buffering.

mod resolve;

pub use resolve::{resolve_batches, ResolvedFetch};

use crate::task::Task;

/// An ordered, size-bounded group of tasks resolved together.
#[derive(Debug)]
pub struct Batch {
    pub index: usize,
    pub tasks: Vec<Task>,
}

/// Split `tasks` into ceil(N / batch_size) batches of at most `batch_size`,
/// preserving submission order.
pub fn group_into_batches(tasks: Vec<Task>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches: Vec<Batch> = Vec::with_capacity(tasks.len().div_ceil(batch_size));
    let mut current: Vec<Task> = Vec::with_capacity(batch_size);
    for task in tasks {
        current.push(task);
        if current.len() == batch_size {
            batches.push(Batch {
                index: batches.len(),
                tasks: std::mem::take(&mut current),
            });
        }
    }
    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            tasks: current,
        });
    }
    batches
}
