//! Tether engine threads
//!
//! This crate owns single-threaded script engines and the machinery for
//! reaching them from other threads. Each engine runs in its own OS thread
//! with its own QuickJS runtime and a current-thread tokio loop.
//!
//! # Architecture
//!
//! - `EngineHandle::spawn` starts the thread and waits, with a bound, for
//!   construction to finish. A failed or hung construction leaves a handle
//!   that reports "not ready" instead of blocking.
//! - The handle is the marshal: `submit` runs a closure on the engine
//!   thread and blocks for its result, `post`/`evaluate` fire and forget.
//!   From the engine thread itself, `submit` runs inline.
//! - Closures receive an [`Engine`], the `!Send` native surface: queue a
//!   script, register or unregister a named host callback.
//! - Scripts talk back through `__host.invoke(name, payload)` and
//!   `__host.emit(event, value)`.

mod command;
mod config;
mod engine;
mod error;
mod globals;
mod handle;
mod readiness;
mod services;
mod spawn;
mod timers;
mod worker;

pub use config::{DEFAULT_INIT_TIMEOUT_MS, EngineConfig};
pub use engine::{Engine, HostCallback};
pub use error::{EngineError, EngineResult};
pub use handle::EngineHandle;
pub use readiness::InitState;
pub use services::{EngineServices, EventSink};
