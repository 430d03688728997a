//! The native engine surface.
//!
//! `Engine` is what closures submitted through the marshal receive. It is
//! `!Send`: it can only be reached from the engine thread, so
//! every mutation of engine state happens there.
//!
//! The surface is one-way in both directions:
//! - `evaluate` queues code for the run loop and returns immediately;
//! - `register_callback` exposes a named host function that scripts reach
//!   through `__host.invoke(name, payload)`.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::services::EngineServices;
use crate::timers::TimerQueue;

/// A host function callable from scripts. Receives the engine and the
/// string payload the script passed.
pub type HostCallback = Rc<dyn Fn(&Engine, &str)>;

thread_local! {
    static CURRENT: RefCell<Option<Engine>> = const { RefCell::new(None) };
}

/// Handle to the engine owned by the current thread.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

struct EngineInner {
    name: String,
    services: EngineServices,
    scripts: RefCell<VecDeque<String>>,
    callbacks: RefCell<HashMap<String, HostCallback>>,
    timers: RefCell<TimerQueue>,
}

impl Engine {
    pub(crate) fn new(name: impl Into<String>, services: EngineServices) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                name: name.into(),
                services,
                scripts: RefCell::new(VecDeque::new()),
                callbacks: RefCell::new(HashMap::new()),
                timers: RefCell::new(TimerQueue::new()),
            }),
        }
    }

    /// The engine running on this thread, if this is an engine thread.
    pub fn current() -> Option<Engine> {
        CURRENT.with(|slot| slot.borrow().clone())
    }

    pub(crate) fn enter(&self) {
        CURRENT.with(|slot| *slot.borrow_mut() = Some(self.clone()));
    }

    pub(crate) fn leave() {
        CURRENT.with(|slot| slot.borrow_mut().take());
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue `code` for evaluation. Fire-and-forget: the result is discarded
    /// and a thrown exception is only logged.
    pub fn evaluate(&self, code: impl Into<String>) {
        self.inner.scripts.borrow_mut().push_back(code.into());
    }

    /// Register a host callback under `name`, replacing any previous one.
    /// Returns true if a callback was replaced.
    pub fn register_callback<F>(&self, name: impl Into<String>, callback: F) -> bool
    where
        F: Fn(&Engine, &str) + 'static,
    {
        let name = name.into();
        tracing::trace!("[{}] Registering host callback {}", self.name(), name);
        self.inner
            .callbacks
            .borrow_mut()
            .insert(name, Rc::new(callback))
            .is_some()
    }

    /// Remove a host callback. Returns false if none was registered.
    ///
    /// Safe to call from inside the callback being removed: the invocation
    /// in progress keeps its own reference until it returns.
    pub fn unregister_callback(&self, name: &str) -> bool {
        let removed = self.inner.callbacks.borrow_mut().remove(name);
        if removed.is_some() {
            tracing::trace!("[{}] Unregistered host callback {}", self.name(), name);
        }
        removed.is_some()
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.inner.callbacks.borrow().contains_key(name)
    }

    pub fn callback_count(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }

    pub fn pending_scripts(&self) -> usize {
        self.inner.scripts.borrow().len()
    }

    pub(crate) fn take_script(&self) -> Option<String> {
        self.inner.scripts.borrow_mut().pop_front()
    }

    /// Invoke a host callback from script. Panics are contained here so
    /// they never unwind through the interpreter.
    pub(crate) fn invoke_callback(&self, name: &str, payload: &str) -> bool {
        let callback = self.inner.callbacks.borrow().get(name).cloned();
        let Some(callback) = callback else {
            tracing::debug!("[{}] No host callback named {}", self.name(), name);
            return false;
        };

        if catch_unwind(AssertUnwindSafe(|| callback(self, payload))).is_err() {
            tracing::error!("[{}] Host callback {} panicked", self.name(), name);
        }
        true
    }

    pub(crate) fn emit(&self, event: &str, payload: &str) {
        if catch_unwind(AssertUnwindSafe(|| self.inner.services.emit(event, payload))).is_err() {
            tracing::error!("[{}] Event sink panicked on {}", self.name(), event);
        }
    }

    pub(crate) fn schedule_timer(&self, delay: Duration) -> u64 {
        self.inner.timers.borrow_mut().schedule(delay)
    }

    pub(crate) fn cancel_timer(&self, id: u64) -> bool {
        self.inner.timers.borrow_mut().cancel(id)
    }

    pub(crate) fn next_timer_deadline(&self) -> Option<Instant> {
        self.inner.timers.borrow().next_deadline()
    }

    pub(crate) fn take_due_timers(&self, now: Instant) -> Vec<u64> {
        self.inner.timers.borrow_mut().take_due(now)
    }

    /// Drop every registered callback and queued script. Called when the
    /// loop exits so state captured by callbacks is released.
    pub(crate) fn clear(&self) {
        let callbacks = std::mem::take(&mut *self.inner.callbacks.borrow_mut());
        let dropped = callbacks.len();
        drop(callbacks);
        self.inner.scripts.borrow_mut().clear();
        if dropped > 0 {
            tracing::debug!("[{}] Dropped {} pending host callbacks", self.name(), dropped);
        }
    }
}
