//! Shared connection budget for the fetch stage.
//!
//! All fetch operations draw connections from one budget (capped at
//! `worker_count * 2`) so total socket usage stays bounded no matter how the
//! pool is sized or how calls overlap with locator resolution.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Budget of concurrent connections, shared across all workers.
#[derive(Debug, Clone)]
pub struct ConnectionBudget {
    max_total: usize,
    semaphore: Arc<Semaphore>,
}

/// One reserved connection; returned to the budget on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionBudget {
    pub fn new(max_total: usize) -> Self {
        let max_total = max_total.max(1);
        Self {
            max_total,
            semaphore: Arc::new(Semaphore::new(max_total)),
        }
    }

    /// Budget sized for a worker pool: two connections per worker.
    pub fn for_workers(worker_count: usize) -> Self {
        Self::new(worker_count.max(1) * 2)
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Reserve one connection, suspending until a slot frees up.
    pub async fn acquire(&self) -> ConnectionSlot {
        // The semaphore is never closed.
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("connection budget semaphore closed");
        ConnectionSlot { _permit: permit }
    }
}
