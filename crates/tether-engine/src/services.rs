//! Host services reachable from scripts.
//!
//! Services are handed to the engine at spawn time and called directly on
//! the engine thread, so they must be `Send + Sync`.

use std::sync::Arc;

/// Receiver for events emitted by scripts through `__host.emit(name, value)`.
///
/// `payload` is the emitted value, strings as-is and anything else as
/// JSON. It is only borrowed for the duration of the call.
pub trait EventSink: Send + Sync + 'static {
    fn dispatch(&self, event: &str, payload: &str);
}

/// Services that can be accessed from JavaScript.
#[derive(Clone, Default)]
pub struct EngineServices {
    /// Event sink for `__host.emit`. Events are dropped when absent.
    pub events: Option<Arc<dyn EventSink>>,
}

impl EngineServices {
    pub fn with_events(events: Arc<dyn EventSink>) -> Self {
        Self {
            events: Some(events),
        }
    }

    pub(crate) fn emit(&self, event: &str, payload: &str) {
        match &self.events {
            Some(sink) => sink.dispatch(event, payload),
            None => tracing::trace!("Dropping event {} (no sink)", event),
        }
    }
}
