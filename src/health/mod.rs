//! Backend health subsystem.
//!
//! # Data Flow
//! ```text
//! Backend call (traffic.rs):
//!     Call starts → grace timer
//!     → Grace elapsed: timing window opens
//!     → Call settles: score = active seconds × score_per_second
//!     → Score over jam threshold: backend jammed until the next batch
//! ```
//!
//! # Design Decisions
//! - Latency scoring complements the circuit breaker: a slow backend is
//!   avoided even when it never errors
//! - Jam state is batch-scoped, not process-scoped

pub mod traffic;

pub use traffic::{RequestId, TrafficDebugState, TrafficMonitor, TrafficStats};

/// Rendering of a traffic summary when nothing has been scored.
pub const NO_TRAFFIC_DATA: &str = "No traffic data";
