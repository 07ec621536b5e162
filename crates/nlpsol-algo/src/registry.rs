//! Registry of solver backends by id.

use std::collections::HashMap;
use std::sync::Arc;

use nlpsol_core::NlpError;

use crate::backends::{AugLagBackend, IpmBackend, SqpBackend};
use crate::traits::NlpBackend;

/// Holds all registered backends.
///
/// Create with `BackendRegistry::new()` for empty or
/// `BackendRegistry::with_defaults()` for the built-in solvers.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn NlpBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `ipm`, `sqp` and `auglag`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(IpmBackend));
        registry.register(Arc::new(SqpBackend));
        registry.register(Arc::new(AugLagBackend));
        registry
    }

    /// Register a backend, replacing any previous one with the same id.
    pub fn register(&mut self, backend: Arc<dyn NlpBackend>) {
        self.backends.insert(backend.id().to_string(), backend);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn NlpBackend>> {
        self.backends.get(id).cloned()
    }

    /// Like [`BackendRegistry::get`], failing with `UnknownBackend`.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn NlpBackend>, NlpError> {
        self.get(id).ok_or_else(|| NlpError::UnknownBackend(id.to_string()))
    }

    /// Registered ids in sorted order.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.backends.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}
