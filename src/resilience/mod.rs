//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to backend:
//!     → registry.rs (find the backend's breaker)
//!     → circuit_breaker.rs (reject while open, count classified failures)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents hammering a failing backend
//! - Failure classification is supplied by the caller
//! - Retries live inside a backend call; the breaker sees one attempt

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retries;

pub use circuit_breaker::{BreakerError, BreakerRejection, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use registry::BreakerRegistry;
pub use retries::{with_retries, CountAllFailures, FailurePolicy};
