//! Archive job dispatcher.
//!
//! Submits "archive this URL" jobs to interchangeable, independently
//! unreliable archiving backends with bounded parallelism, per-backend
//! circuit breakers, latency-based congestion avoidance and
//! skip-if-already-archived checks.

// Core dispatch
pub mod backend;
pub mod dispatch;
pub mod memento;

// Backend protection
pub mod health;
pub mod resilience;

// Cross-cutting concerns
pub mod config;
pub mod observability;

pub use config::DispatchConfig;
pub use dispatch::{ArchiveCoordinator, ArchiveOutcome, BatchRequest, DispatchError, WorkItem};
