//! Engine construction settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on how long `EngineHandle::spawn` waits for construction.
pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 5_000;

/// Configuration for a single engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Thread name, also used as a logging prefix.
    pub name: String,
    /// How long the constructor waits for the engine to come up.
    pub init_timeout_ms: u64,
    /// QuickJS heap limit in bytes.
    pub memory_limit: Option<usize>,
    /// QuickJS stack limit in bytes.
    pub max_stack_size: Option<usize>,
    /// Script evaluated synchronously during construction. A throw here
    /// fails construction.
    pub startup_script: Option<String>,
    /// Script loaded after construction. The document stays `"loading"`
    /// until the value it evaluates to settles.
    pub content_script: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "tether-engine".to_string(),
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            memory_limit: None,
            max_stack_size: None,
            startup_script: None,
            content_script: None,
        }
    }
}

impl EngineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    pub fn with_startup_script(mut self, script: impl Into<String>) -> Self {
        self.startup_script = Some(script.into());
        self
    }

    pub fn with_content_script(mut self, script: impl Into<String>) -> Self {
        self.content_script = Some(script.into());
        self
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}
