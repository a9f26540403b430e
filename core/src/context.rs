//! Shared tool data store
//!
//! `ToolData` is constructed once by whoever hosts a run and handed to the
//! tool manager. Cloning it shares the same underlying map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

/// Well-known keys written by the engine
pub mod keys {
    /// Error message of the phase that failed
    pub const EXECUTION_ERROR: &str = "execution_error";
    /// Set once the execution phase has returned
    pub const EXECUTION_COMPLETED: &str = "execution_completed";
    /// Set when a duration stop condition ended the run
    pub const TIME_LIMIT_REACHED: &str = "time_limit_reached";
}

/// Shared key/value store for one tool run
#[derive(Debug, Clone, Default)]
pub struct ToolData {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl ToolData {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a value
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.map().insert(key.into(), value.into());
    }

    /// Get a copy of a value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.map().get(key).cloned()
    }

    /// Remove a value
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.map().remove(key)
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.map().contains_key(key)
    }

    /// Store a boolean flag
    pub fn set_flag(&self, key: impl Into<String>, value: bool) {
        self.set(key, Value::Bool(value));
    }

    /// Read a boolean flag (missing or non-boolean reads as `false`)
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Record the run's top-level error
    pub fn record_execution_error(&self, message: impl Into<String>) {
        self.set(keys::EXECUTION_ERROR, Value::String(message.into()));
    }

    /// The recorded top-level error, if any
    pub fn execution_error(&self) -> Option<String> {
        self.get(keys::EXECUTION_ERROR)
            .and_then(|v| v.as_str().map(str::to_string))
    }
}
