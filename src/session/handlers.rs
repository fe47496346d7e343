//! Per-event handler table

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use super::event::Event;

/// Callback invoked with an event's data
pub type Handler = Arc<dyn Fn(Value) + Send + Sync + 'static>;

/// Handlers keyed by event name
///
/// Cloning shares the table. Registration appends; handlers for a name
/// are kept in registration order. Dispatch works on a snapshot, so
/// registering during a dispatch is safe.
#[derive(Clone, Default)]
pub struct EventHandlers {
    inner: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
}

impl EventHandlers {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Snapshot of the handlers for `event`
    pub fn handlers_for(&self, event: &str) -> Vec<Handler> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of handlers registered for `event`
    pub fn count(&self, event: &str) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Start every handler for `event` on the blocking pool
    ///
    /// Handlers are plain closures that may block, so each runs via
    /// `spawn_blocking` rather than on a runtime worker. They are started in
    /// registration order and not awaited: a slow or panicking handler
    /// affects neither the other handlers nor the caller's receive loop.
    /// The runtime context is kept, so handlers may `tokio::spawn`.
    /// Returns how many handlers were started.
    pub fn dispatch(&self, event: Event) -> usize {
        let handlers = self.handlers_for(&event.event);
        debug!(event = %event.event, handlers = handlers.len(), "dispatching event");

        for handler in &handlers {
            let handler = Arc::clone(handler);
            let data = event.data.clone();
            tokio::task::spawn_blocking(move || handler(data));
        }

        handlers.len()
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = table.keys().collect();
        names.sort();
        f.debug_struct("EventHandlers").field("events", &names).finish()
    }
}
