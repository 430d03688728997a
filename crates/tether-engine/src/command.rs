//! Work items sent to the engine thread.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::engine::Engine;

type Job = Box<dyn FnOnce(&Engine) + Send + 'static>;

/// A unit of work executed exactly once by the engine loop, in the order
/// it was queued.
pub(crate) struct Task {
    job: Job,
}

impl Task {
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce(&Engine) + Send + 'static,
    {
        Self { job: Box::new(job) }
    }

    /// Run the task. A panic is logged and swallowed so it never takes the
    /// loop down.
    pub fn run(self, engine: &Engine) {
        let job = self.job;
        if catch_unwind(AssertUnwindSafe(|| job(engine))).is_err() {
            tracing::error!("[{}] Task panicked on the engine thread", engine.name());
        }
    }
}
