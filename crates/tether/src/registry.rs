//! Handle table over engine instances.
//!
//! The surrounding layer never sees an `EngineHandle`; it holds an opaque
//! non-zero integer. Lookups clone the instance out of the map so no map
//! guard is held across a blocking call.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tether_engine::{EngineConfig, EngineHandle, EngineResult, EngineServices, EventSink};

use crate::bridge;
use crate::config::TetherConfig;

/// Native receiver for one named event. Called on the engine thread with
/// the emitted value: strings as-is, anything else as JSON.
pub type EventCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Event name to callback mapping of one instance.
#[derive(Default)]
pub struct EventTable {
    callbacks: RwLock<HashMap<String, EventCallback>>,
}

impl EventTable {
    pub fn set(&self, event: impl Into<String>, callback: EventCallback) {
        self.callbacks.write().insert(event.into(), callback);
    }

    pub fn remove(&self, event: &str) -> bool {
        self.callbacks.write().remove(event).is_some()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.callbacks.read().contains_key(event)
    }
}

impl EventSink for EventTable {
    fn dispatch(&self, event: &str, payload: &str) {
        // Cloned out so a callback may (un)register events without deadlocking.
        let callback = self.callbacks.read().get(event).cloned();
        match callback {
            Some(callback) => callback(payload),
            None => tracing::trace!("No callback for event {}", event),
        }
    }
}

/// One live engine and its event table.
pub struct Instance {
    engine: EngineHandle,
    events: Arc<EventTable>,
}

impl Instance {
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn events(&self) -> &EventTable {
        &self.events
    }
}

/// Registry of engine instances keyed by opaque handle.
pub struct Registry {
    next_handle: AtomicU64,
    instances: DashMap<u64, Arc<Instance>>,
    engine_config: EngineConfig,
    default_timeout: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::from_config(&TetherConfig::default())
    }
}

impl Registry {
    /// Registry whose instances are built from `engine_config`.
    pub fn new(engine_config: EngineConfig) -> Self {
        Self::with_timeout(engine_config, Duration::from_millis(crate::config::DEFAULT_TIMEOUT_MS))
    }

    pub fn from_config(config: &TetherConfig) -> Self {
        Self::with_timeout(config.engine.clone(), config.bridge.default_timeout())
    }

    fn with_timeout(engine_config: EngineConfig, default_timeout: Duration) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            instances: DashMap::new(),
            engine_config,
            default_timeout,
        }
    }

    /// Start an instance with the registry's engine settings.
    pub fn create_instance(&self) -> EngineResult<u64> {
        self.create_instance_with(self.engine_config.clone())
    }

    /// Start an instance with its own settings.
    ///
    /// Returns once construction settled or its timeout elapsed. A failed
    /// construction still yields a handle; it reports "not ready".
    pub fn create_instance_with(&self, mut config: EngineConfig) -> EngineResult<u64> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        config.name = format!("{}-{}", config.name, handle);

        let events = Arc::new(EventTable::default());
        let services = EngineServices::with_events(events.clone());
        let engine = EngineHandle::spawn(config, services)?;

        tracing::debug!("Created instance {} (ready: {})", handle, engine.is_ready());
        self.instances.insert(handle, Arc::new(Instance { engine, events }));
        Ok(handle)
    }

    /// Terminate the engine and join its thread. False for unknown handles.
    pub fn destroy_instance(&self, handle: u64) -> bool {
        let Some((_, instance)) = self.instances.remove(&handle) else {
            return false;
        };
        if let Err(err) = instance.engine.shutdown() {
            tracing::warn!("Instance {} did not shut down cleanly: {}", handle, err);
        }
        tracing::debug!("Destroyed instance {}", handle);
        true
    }

    pub fn get(&self, handle: u64) -> Option<Arc<Instance>> {
        self.instances.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    /// Fire-and-forget evaluation. False when the instance is unknown or
    /// cannot accept work.
    pub fn evaluate(&self, handle: u64, code: impl Into<String>) -> bool {
        let Some(instance) = self.get(handle) else {
            return false;
        };
        match instance.engine.evaluate(code) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("Instance {} rejected evaluation: {}", handle, err);
                false
            }
        }
    }

    /// Correlated evaluation; see [`bridge::evaluate_sync`]. A zero
    /// `timeout_ms` selects the configured default.
    pub fn evaluate_sync(&self, handle: u64, code: &str, timeout_ms: u64) -> String {
        let Some(instance) = self.get(handle) else {
            tracing::debug!("evaluate_sync on unknown instance {}", handle);
            return String::new();
        };
        let timeout = match timeout_ms {
            0 => self.default_timeout,
            ms => Duration::from_millis(ms),
        };
        bridge::evaluate_sync(&instance.engine, code, timeout)
    }

    pub fn is_ready(&self, handle: u64) -> bool {
        self.get(handle).is_some_and(|instance| instance.engine.is_ready())
    }

    /// Route `__host.emit(event, ...)` of one instance to `callback`.
    pub fn set_event_callback(&self, handle: u64, event: impl Into<String>, callback: EventCallback) -> bool {
        let Some(instance) = self.get(handle) else {
            return false;
        };
        instance.events.set(event, callback);
        true
    }

    pub fn remove_event_callback(&self, handle: u64, event: &str) -> bool {
        self.get(handle).is_some_and(|instance| instance.events.remove(event))
    }

    /// Run `f` against the engine of `handle`.
    pub fn with_engine<R>(&self, handle: u64, f: impl FnOnce(&EngineHandle) -> R) -> Option<R> {
        self.get(handle).map(|instance| f(&instance.engine))
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.instances.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn handles(&self) -> Vec<u64> {
        let mut handles: Vec<u64> = self.instances.iter().map(|entry| *entry.key()).collect();
        handles.sort_unstable();
        handles
    }

    /// Destroy every instance.
    pub fn shutdown_all(&self) {
        for handle in self.handles() {
            self.destroy_instance(handle);
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
