//! Backend lookup.

use std::sync::Arc;

use crate::backend::{ArchiveBackend, HttpBackend};
use crate::config::{BackendConfig, RetryConfig};

/// Resolves backend ids. `list` returns backends in registry order.
pub trait BackendRegistry: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<dyn ArchiveBackend>>;
    fn list(&self) -> Vec<Arc<dyn ArchiveBackend>>;
}

/// In-memory registry; order is registration order.
#[derive(Default, Clone)]
pub struct StaticRegistry {
    backends: Vec<Arc<dyn ArchiveBackend>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any existing backend with the same id in place.
    pub fn register(&mut self, backend: Arc<dyn ArchiveBackend>) {
        match self.backends.iter().position(|b| b.id() == backend.id()) {
            Some(index) => self.backends[index] = backend,
            None => self.backends.push(backend),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ArchiveBackend>) -> Self {
        self.register(backend);
        self
    }

    /// One [`HttpBackend`] per configured backend, in config order.
    pub fn from_config(backends: &[BackendConfig], retries: &RetryConfig) -> Result<Self, reqwest::Error> {
        let mut registry = Self::new();
        for config in backends {
            let backend = HttpBackend::new(config.clone(), retries.clone())?;
            tracing::debug!(backend_id = %config.id, enabled = config.enabled, "Registered HTTP backend");
            registry.register(Arc::new(backend));
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl BackendRegistry for StaticRegistry {
    fn get(&self, id: &str) -> Option<Arc<dyn ArchiveBackend>> {
        self.backends.iter().find(|b| b.id() == id).cloned()
    }

    fn list(&self) -> Vec<Arc<dyn ArchiveBackend>> {
        self.backends.clone()
    }
}
