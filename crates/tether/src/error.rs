//! Error types for the bridge.

use std::time::Duration;

use tether_engine::EngineError;

/// Why a correlated call produced no result.
///
/// The handle-level API flattens all of these into the empty sentinel
/// string; `try_evaluate_sync` keeps them apart.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine dropped the call before replying")]
    Abandoned,

    #[error("Cannot block on the engine thread")]
    Reentrant,

    #[error("Unknown instance handle {0}")]
    UnknownInstance(u64),

    #[error("Malformed notification: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Invalid payload encoding: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
