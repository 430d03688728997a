//! Engine spawn.
//!
//! Starts the dedicated engine thread and waits, with a bound, for the
//! engine to come up. Construction failure is reported through the
//! handle's readiness state rather than as an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::handle::EngineHandle;
use crate::readiness::{InitState, Shared};
use crate::services::EngineServices;
use crate::worker::run_worker;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

impl EngineHandle {
    /// Spawn an engine on its own thread.
    ///
    /// Returns once the engine is ready, construction failed, or
    /// `config.init_timeout_ms` elapsed, whichever comes first. Only a
    /// failure to start the OS thread is an error.
    pub fn spawn(config: EngineConfig, services: EngineServices) -> EngineResult<EngineHandle> {
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let name = config.name.clone();
        let init_timeout = config.init_timeout();
        tracing::debug!("[spawn_engine] Starting {} (#{})", name, id);

        let shared = Arc::new(Shared::new());
        let worker_shared = Arc::clone(&shared);

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let thread_name = name.clone();
        let thread_handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || -> EngineResult<()> {
                tracing::debug!("[spawn_engine:{}] Thread started", thread_name);

                // Create tokio runtime for this thread
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        worker_shared.readiness.fail(err.to_string());
                        return Err(EngineError::SpawnFailed(err));
                    }
                };

                let result = rt.block_on(run_worker(config, services, worker_shared, task_rx, shutdown_rx));

                rt.shutdown_background();
                tracing::debug!("[spawn_engine:{}] Thread exiting", thread_name);
                result
            })?;

        let handle = EngineHandle {
            id,
            name,
            task_tx,
            shutdown_tx,
            shared,
            thread_id: thread_handle.thread().id(),
            thread_handle: Mutex::new(Some(thread_handle)),
        };

        match handle.shared.readiness.wait(init_timeout) {
            InitState::Ready => tracing::debug!("[spawn_engine] {} is ready", handle.name),
            InitState::Pending => tracing::warn!(
                "[spawn_engine] {} not ready after {:?}; continuing without it",
                handle.name,
                init_timeout
            ),
            InitState::Failed(reason) => {
                tracing::warn!("[spawn_engine] {} failed to start: {}", handle.name, reason)
            }
        }

        Ok(handle)
    }
}
