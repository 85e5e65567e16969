//! Fallback ordering.
//!
//! # Design Decisions
//! - The base order (preferences first, then the rest in registry order)
//!   is computed once per batch from the backends that passed availability
//! - Jam and breaker exclusion is applied when each item starts, so
//!   degradation found mid-batch only affects later items

use std::sync::Arc;

use crate::backend::ArchiveBackend;
use crate::dispatch::error::{BackendFailure, NoCandidatesReason};
use crate::health::traffic::TrafficMonitor;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::registry::BreakerRegistry;

/// Message recorded for a backend skipped because it is jammed.
pub const JAMMED_MESSAGE: &str = "jammed (slow responses this batch)";
/// Message recorded for a backend skipped because its breaker is open.
pub const BREAKER_OPEN_MESSAGE: &str = "circuit breaker open";

/// One entry of an item's fallback chain.
pub enum Candidate {
    Ready(Arc<dyn ArchiveBackend>),
    Skipped(BackendFailure),
}

/// Order `available` by `preference`, then the remaining backends in their given order.
pub fn order_backends(
    available: Vec<Arc<dyn ArchiveBackend>>,
    preference: &[String],
) -> Vec<Arc<dyn ArchiveBackend>> {
    let mut ordered: Vec<Arc<dyn ArchiveBackend>> = Vec::with_capacity(available.len());
    for id in preference {
        if ordered.iter().any(|b| b.id() == id.as_str()) {
            continue;
        }
        if let Some(backend) = available.iter().find(|b| b.id() == id.as_str()) {
            ordered.push(backend.clone());
        }
    }
    for backend in available {
        if !ordered.iter().any(|b| b.id() == backend.id()) {
            ordered.push(backend);
        }
    }
    ordered
}

/// The fallback chain for one item.
///
/// Fails with the reason of the filter that left nothing to try.
pub fn select_candidates(
    base_order: &[Arc<dyn ArchiveBackend>],
    traffic: &TrafficMonitor,
    breakers: &BreakerRegistry,
) -> Result<Vec<Candidate>, NoCandidatesReason> {
    if base_order.is_empty() {
        return Err(NoCandidatesReason::Unavailable);
    }

    let jammed: Vec<bool> = base_order.iter().map(|b| traffic.is_jammed(b.id())).collect();
    if jammed.iter().all(|j| *j) {
        return Err(NoCandidatesReason::Jammed);
    }

    let candidates: Vec<Candidate> = base_order
        .iter()
        .zip(jammed)
        .map(|(backend, jammed)| {
            if jammed {
                Candidate::Skipped(skip(backend.id(), JAMMED_MESSAGE))
            } else if breakers.state_of(backend.id()) == CircuitState::Open {
                Candidate::Skipped(skip(backend.id(), BREAKER_OPEN_MESSAGE))
            } else {
                Candidate::Ready(backend.clone())
            }
        })
        .collect();

    if candidates.iter().any(|c| matches!(c, Candidate::Ready(_))) {
        Ok(candidates)
    } else {
        Err(NoCandidatesReason::BreakerLockout)
    }
}

fn skip(backend_id: &str, message: &str) -> BackendFailure {
    tracing::debug!(backend_id = %backend_id, reason = %message, "Skipping backend");
    BackendFailure {
        backend_id: backend_id.to_string(),
        message: message.to_string(),
        kind: None,
    }
}
