//! `EngineHandle`: the thread-safe side of an engine and the synchronous
//! marshal.
//!
//! Any thread may hold an `EngineHandle` and ask the engine thread to run a
//! closure. The closure receives the thread-bound [`Engine`]; its return
//! value comes back over a one-shot channel while the caller blocks.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::sync_channel;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::command::Task;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::readiness::{InitState, Shared};

/// Handle to a spawned engine thread.
pub struct EngineHandle {
    /// Process-unique engine id
    pub(crate) id: u64,
    /// Engine (and thread) name
    pub(crate) name: String,
    /// Task sender
    pub(crate) task_tx: mpsc::UnboundedSender<Task>,
    /// Shutdown signal sender
    pub(crate) shutdown_tx: watch::Sender<bool>,
    /// Readiness, running and terminated flags
    pub(crate) shared: Arc<Shared>,
    /// Id of the engine thread, for reentrancy detection
    pub(crate) thread_id: ThreadId,
    /// Thread join handle
    pub(crate) thread_handle: Mutex<Option<thread::JoinHandle<EngineResult<()>>>>,
}

impl EngineHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once construction succeeded and until the engine terminates.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    pub fn init_state(&self) -> InitState {
        self.shared.readiness.state()
    }

    /// Block until construction settles or `timeout` elapses.
    pub fn wait_ready(&self, timeout: std::time::Duration) -> bool {
        self.shared.readiness.wait(timeout) == InitState::Ready && self.is_ready()
    }

    /// True when called from this engine's own thread.
    pub fn is_engine_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn check_ready(&self) -> EngineResult<()> {
        if self.is_terminated() {
            return Err(EngineError::Terminated);
        }
        if !self.is_ready() {
            return Err(EngineError::NotReady);
        }
        Ok(())
    }

    /// Run `f` on the engine thread and wait for its result.
    ///
    /// Called from the engine thread itself, `f` runs inline: queueing it
    /// would deadlock since the loop cannot service its queue while blocked
    /// on itself. A panic in `f` is caught where it happens and reported as
    /// [`EngineError::TaskPanicked`].
    pub fn try_submit<R, F>(&self, f: F) -> EngineResult<R>
    where
        F: FnOnce(&Engine) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_engine_thread() {
            let engine = Engine::current().ok_or(EngineError::Terminated)?;
            return catch_unwind(AssertUnwindSafe(|| f(&engine))).map_err(|_| {
                tracing::error!("[{}] Inline task panicked", self.name);
                EngineError::TaskPanicked
            });
        }

        self.check_ready()?;

        let (reply_tx, reply_rx) = sync_channel(1);
        let name = self.name.clone();
        self.task_tx
            .send(Task::new(move |engine| {
                let result = catch_unwind(AssertUnwindSafe(|| f(engine))).map_err(|_| {
                    tracing::error!("[{}] Submitted task panicked", name);
                    EngineError::TaskPanicked
                });
                let _ = reply_tx.send(result);
            }))
            .map_err(|_| EngineError::ChannelClosed)?;

        reply_rx.recv().map_err(|_| EngineError::ChannelClosed)?
    }

    /// Like [`try_submit`](Self::try_submit) but any failure yields
    /// `R::default()`.
    pub fn submit<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&Engine) -> R + Send + 'static,
        R: Default + Send + 'static,
    {
        self.try_submit(f).unwrap_or_else(|err| {
            tracing::debug!("[{}] Submit failed: {}", self.name, err);
            R::default()
        })
    }

    /// Queue `f` on the engine thread without waiting for it.
    pub fn post<F>(&self, f: F) -> EngineResult<()>
    where
        F: FnOnce(&Engine) + Send + 'static,
    {
        self.check_ready()?;
        self.task_tx
            .send(Task::new(f))
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Fire-and-forget evaluation of `code`.
    pub fn evaluate(&self, code: impl Into<String>) -> EngineResult<()> {
        let code = code.into();
        self.post(move |engine| engine.evaluate(code))
    }

    /// Ask the engine loop to stop. Also interrupts a running script.
    pub fn terminate(&self) {
        if self.shared.mark_terminated() {
            return;
        }
        tracing::debug!("[{}] Terminating engine", self.name);
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the engine thread to finish. A no-op on the engine thread
    /// itself or when already joined.
    pub fn join(&self) -> EngineResult<()> {
        if self.is_engine_thread() {
            return Ok(());
        }
        let handle = self.thread_handle.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| EngineError::ThreadPanic)??;
        }
        Ok(())
    }

    /// Terminate and join.
    pub fn shutdown(&self) -> EngineResult<()> {
        self.terminate();
        self.join()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.terminate();
        if self.is_engine_thread() {
            return;
        }
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
