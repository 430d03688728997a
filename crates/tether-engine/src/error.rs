//! Error types for the engine thread.

/// Errors that can occur when talking to an engine thread.
///
/// None of these ever carry a panic payload across the thread boundary:
/// failures on the engine thread are caught there and reported by value.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine is not ready")]
    NotReady,

    #[error("Engine has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Engine thread panicked")]
    ThreadPanic,

    #[error("Task panicked on the engine thread")]
    TaskPanicked,

    #[error("JavaScript error: {0}")]
    JavaScript(String),

    #[error("Failed to create engine: {0}")]
    Creation(String),

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

impl From<rquickjs::Error> for EngineError {
    fn from(err: rquickjs::Error) -> Self {
        EngineError::JavaScript(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
