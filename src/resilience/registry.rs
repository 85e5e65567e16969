//! Per-backend breaker registry.
//!
//! # Responsibilities
//! - Create one breaker per backend id on first use
//! - Answer state queries without creating breakers
//! - Bulk inspection and reset
//!
//! # Design Decisions
//! - Breakers live as long as the registry; none are ever removed
//! - Arcs are cloned out of the map before calling into a breaker so no
//!   shard lock is held across breaker locks or event delivery

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::BreakerConfig;
use crate::observability::events::EventSink;
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};

/// Owns every backend's circuit breaker.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
    sink: Arc<dyn EventSink>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            sink,
        }
    }

    /// Breaker for `backend_id`, created on first use.
    pub fn breaker(&self, backend_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(backend_id) {
            return existing.value().clone();
        }
        self.breakers
            .entry(backend_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(backend_id = %backend_id, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(
                    backend_id,
                    self.config.clone(),
                    self.sink.clone(),
                ))
            })
            .value()
            .clone()
    }

    /// State of `backend_id`; CLOSED for ids never used.
    pub fn state_of(&self, backend_id: &str) -> CircuitState {
        let breaker = self.breakers.get(backend_id).map(|b| b.value().clone());
        breaker.map_or(CircuitState::Closed, |b| b.state())
    }

    /// Snapshots of every known breaker, sorted by backend id.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.all().iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        snapshots
    }

    /// Backend ids whose breaker is currently OPEN, sorted.
    pub fn open_backends(&self) -> Vec<String> {
        let mut open: Vec<_> = self
            .all()
            .iter()
            .filter(|b| b.state() == CircuitState::Open)
            .map(|b| b.backend_id().to_string())
            .collect();
        open.sort();
        open
    }

    pub fn reset_all(&self) {
        for breaker in self.all() {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|entry| entry.value().clone()).collect()
    }
}
