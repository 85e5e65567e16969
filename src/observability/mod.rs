//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → events.rs (breaker transitions, jams, batch progress)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Alerting / progress UIs via an EventSink
//! ```

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{
    BatchProgress, BatchSummary, BreakerTransition, ChannelSink, DispatchEvent, EventSink,
    LogSink, NullSink,
};
