use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owned by a task's handle. Dropping it tells the task to exit at its next check.
pub(crate) struct Stopper {
    stopped: Arc<AtomicBool>,
}

pub(crate) struct StopCheck {
    stopped: Arc<AtomicBool>,
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl StopCheck {
    pub(crate) fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

pub(crate) fn new() -> (Stopper, StopCheck) {
    let stopped = Arc::new(AtomicBool::new(false));

    (
        Stopper {
            stopped: stopped.clone(),
        },
        StopCheck { stopped },
    )
}
