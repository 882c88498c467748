//! In-process worker registry.
//!
//! Embedders register named handler functions here; the in-process and
//! isolated transports look workers up by the address in their directions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::job::Job;

/// A registered in-process worker. Returns `Err(message)` on failure;
/// panics are caught by the call and reported the same way.
pub type WorkerHandler = Arc<dyn Fn(&Job) -> Result<(), String> + Send + Sync>;

/// Named in-process workers.
#[derive(Default)]
pub struct WorkerRegistry {
    handlers: RwLock<HashMap<String, WorkerHandler>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous registration.
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> Result<(), String> + Send + Sync + 'static,
    {
        self.handlers.write().insert(name.into(), Arc::new(handler));
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<WorkerHandler> {
        self.handlers.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}
