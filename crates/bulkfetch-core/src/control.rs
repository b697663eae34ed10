//! Cooperative abort signal for a run.
//!
//! Aborting prevents new units of work from starting; in-flight operations
//! run to completion or natural failure rather than being killed. Tasks that
//! never started still receive a terminal result so the report stays whole.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared abort token. Clone freely; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abort. Idempotent; checked by the coordinator and the executor
    /// before each new unit of work.
    pub fn request_abort(&self) {
        if !self.flag.swap(true, Ordering::Relaxed) {
            tracing::info!("abort requested: no new work will start");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
