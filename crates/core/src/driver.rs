//! Bridges the prefetch scheduler to the worker pool

use crate::loader::RecordLoader;
use crate::prefetch::{load_guarded, FetchBatch, PrefetchScheduler};
use lectern_scheduler::JobSource;
use std::sync::Arc;

/// Job source that pulls batches from a scheduler and runs them through a
/// loader
pub struct FetchDriver {
    scheduler: Arc<PrefetchScheduler>,
    loader: Arc<dyn RecordLoader>,
}

impl FetchDriver {
    pub fn new(scheduler: Arc<PrefetchScheduler>, loader: Arc<dyn RecordLoader>) -> Self {
        Self { scheduler, loader }
    }
}

impl JobSource for FetchDriver {
    type Job = FetchBatch;

    fn next_job(&self) -> Option<FetchBatch> {
        self.scheduler.next_batch()
    }

    fn execute(&self, batch: FetchBatch) {
        let outcome = load_guarded(self.loader.as_ref(), &batch);
        self.scheduler.complete_batch(batch.id, outcome);
    }
}
