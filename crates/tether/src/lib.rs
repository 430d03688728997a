//! Tether
//!
//! Synchronous, correlated calls into single-threaded script engines.
//!
//! Each engine lives on its own thread (see [`tether_engine`]) and only
//! knows how to evaluate code and call named host callbacks, both one-way.
//! This crate builds request/response on top of that:
//!
//! - [`bridge`]: `evaluate_sync`, blocking on a per-call state until the
//!   engine posts the result back under a unique correlation key;
//! - [`call_state`]: the state shared by the waiting caller and the
//!   engine-side reply handler, freed by whichever releases last;
//! - [`protocol`]: the staged/final notification format;
//! - [`registry`]: the opaque-handle API, with per-instance event routing;
//! - [`ffi`]: a C ABI over a process-global registry.

pub mod bridge;
pub mod call_state;
pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod protocol;
pub mod registry;

pub use bridge::{StageObserver, evaluate_sync, evaluate_sync_observed, try_evaluate_sync};
pub use config::{BridgeConfig, LoggingConfig, TetherConfig};
pub use error::{BridgeError, BridgeResult};
pub use protocol::{ERROR_MARKER, Stage};
pub use registry::{EventCallback, Registry};

pub use tether_engine;
