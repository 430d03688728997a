//! Construction readiness shared between an `EngineHandle` and its thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome of engine construction as seen from outside the engine thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    /// Construction has not finished (yet).
    Pending,
    /// The engine is up and its loop is running.
    Ready,
    /// Construction failed. The handle stays usable but every operation
    /// short-circuits.
    Failed(String),
}

/// Readiness flag plus the condition variable the constructor waits on.
pub(crate) struct Readiness {
    state: Mutex<InitState>,
    cond: Condvar,
}

impl Readiness {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Pending),
            cond: Condvar::new(),
        }
    }

    pub fn succeed(&self) {
        self.settle(InitState::Ready);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.settle(InitState::Failed(reason.into()));
    }

    /// Settle once. Later calls are ignored.
    fn settle(&self, outcome: InitState) {
        let mut state = self.state.lock();
        if *state == InitState::Pending {
            *state = outcome;
            self.cond.notify_all();
        }
    }

    /// Block until construction settles or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> InitState {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state == InitState::Pending {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.clone()
    }

    pub fn state(&self) -> InitState {
        self.state.lock().clone()
    }
}

/// State shared between the handle and the engine thread.
pub(crate) struct Shared {
    pub readiness: Readiness,
    running: AtomicBool,
    terminated: Arc<AtomicBool>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            readiness: Readiness::new(),
            running: AtomicBool::new(false),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.state() == InitState::Ready && self.is_running() && !self.is_terminated()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Mark terminated. Returns true if it already was.
    pub fn mark_terminated(&self) -> bool {
        self.terminated.swap(true, Ordering::SeqCst)
    }

    /// The flag polled by the interpreter's interrupt handler.
    pub fn terminated_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }
}
