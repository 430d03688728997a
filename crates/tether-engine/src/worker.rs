//! Worker thread implementation for the engine.
//!
//! This module contains the run loop that owns the QuickJS runtime on its
//! dedicated thread: it runs submitted tasks, evaluates queued scripts,
//! drains the job queue and fires timers, in that order, until shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rquickjs::{Context, Function, Runtime};
use tokio::sync::{mpsc, watch};

use crate::command::Task;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::globals::{self, describe_error};
use crate::readiness::Shared;
use crate::services::EngineServices;

/// The interpreter owned by the engine thread.
///
/// Field order matters: the context must drop before the runtime.
pub(crate) struct JsHost {
    context: Context,
    runtime: Runtime,
    engine: Engine,
    terminated: Arc<AtomicBool>,
}

impl JsHost {
    pub fn new(config: &EngineConfig, engine: Engine, terminated: Arc<AtomicBool>) -> Result<Self, EngineError> {
        let runtime = Runtime::new().map_err(|e| EngineError::Creation(e.to_string()))?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }

        // Lets `terminate()` break out of a runaway script, including a
        // startup script that never returns.
        let interrupt = Arc::clone(&terminated);
        runtime.set_interrupt_handler(Some(Box::new(move || interrupt.load(Ordering::SeqCst))));

        let context = Context::full(&runtime).map_err(|e| EngineError::Creation(e.to_string()))?;

        context.with(|ctx| -> Result<(), EngineError> {
            globals::install(&ctx, &engine).map_err(|e| EngineError::Creation(describe_error(&ctx, e)))?;

            if let Some(script) = &config.startup_script {
                ctx.eval::<(), _>(script.as_str())
                    .map_err(|e| EngineError::Creation(describe_error(&ctx, e)))?;
            }
            Ok(())
        })?;

        Ok(Self {
            context,
            runtime,
            engine,
            terminated,
        })
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Evaluate queued scripts and run pending jobs until both are empty.
    pub fn pump(&self) {
        loop {
            let mut progressed = false;

            while let Some(script) = self.engine.take_script() {
                self.eval(&script);
                progressed = true;
            }

            while self.runtime.is_job_pending() {
                match self.runtime.execute_pending_job() {
                    Ok(true) => progressed = true,
                    Ok(false) => break,
                    Err(_) => {
                        tracing::warn!("[{}] Pending job raised an exception", self.engine.name());
                        progressed = true;
                    }
                }
                if self.is_terminated() {
                    return;
                }
            }

            if !progressed || self.is_terminated() {
                return;
            }
        }
    }

    fn eval(&self, script: &str) {
        self.context.with(|ctx| {
            if let Err(err) = ctx.eval::<(), _>(script) {
                let message = describe_error(&ctx, err);
                tracing::warn!("[{}] Script evaluation failed: {}", self.engine.name(), message);
            }
        });
    }

    /// Fire every timer whose deadline has passed.
    pub fn fire_due_timers(&self) {
        let due = self.engine.take_due_timers(Instant::now());
        if due.is_empty() {
            return;
        }

        self.context.with(|ctx| {
            let fire: Function = match ctx.globals().get("__host_fire_timer") {
                Ok(fire) => fire,
                Err(err) => {
                    tracing::error!("[{}] Timer dispatch missing: {}", self.engine.name(), err);
                    return;
                }
            };

            for id in due {
                if let Err(err) = fire.call::<_, ()>((id as f64,)) {
                    let message = describe_error(&ctx, err);
                    tracing::warn!("[{}] Timer {} failed: {}", self.engine.name(), id, message);
                }
            }
        });
    }
}

/// The main worker loop that runs inside the spawned thread.
pub(crate) async fn run_worker(
    config: EngineConfig,
    services: EngineServices,
    shared: Arc<Shared>,
    mut task_rx: mpsc::UnboundedReceiver<Task>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let name = config.name.clone();
    tracing::debug!("[run_worker:{}] Creating engine", name);

    let engine = Engine::new(name.clone(), services);
    let host = match JsHost::new(&config, engine.clone(), shared.terminated_flag()) {
        Ok(host) => host,
        Err(err) => {
            tracing::warn!("[run_worker:{}] Engine construction failed: {}", name, err);
            shared.readiness.fail(err.to_string());
            return Err(err);
        }
    };

    if let Some(content) = &config.content_script {
        let literal = serde_json::Value::String(content.clone()).to_string();
        engine.evaluate(format!("__engine._load({literal});"));
    }

    engine.enter();
    shared.set_running(true);
    shared.readiness.succeed();
    tracing::debug!("[run_worker:{}] Engine ready", name);

    loop {
        if *shutdown_rx.borrow() || shared.is_terminated() {
            tracing::debug!("[run_worker:{}] Shutdown signal received", name);
            break;
        }

        host.pump();
        let deadline = engine.next_timer_deadline();

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::debug!("[run_worker:{}] Received shutdown signal", name);
                    break;
                }
            }

            task = task_rx.recv() => match task {
                Some(task) => task.run(&engine),
                None => {
                    tracing::debug!("[run_worker:{}] Task channel closed", name);
                    break;
                }
            },

            _ = sleep_until(deadline) => host.fire_due_timers(),
        }
    }

    shared.set_running(false);
    // Queued tasks are dropped unrun; their reply channels close and the
    // callers see `ChannelClosed`.
    task_rx.close();
    engine.clear();
    Engine::leave();
    drop(host);

    tracing::debug!("[run_worker:{}] Worker finished", name);
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
