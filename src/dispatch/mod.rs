//! Batch dispatch.
//!
//! # Data Flow
//! ```text
//! Vec<WorkItem> (item.rs)
//!     → coordinator.rs (batch framing, per-item decisions)
//!     → queue.rs (bounded concurrency, ordered results)
//!     → fallback.rs (per-item backend chain)
//!     → Vec<ArchiveOutcome> (outcome.rs), failures typed by error.rs
//! ```

pub mod coordinator;
pub mod error;
pub mod fallback;
pub mod item;
pub mod outcome;
pub mod queue;

pub use coordinator::{
    should_auto_archive, ArchiveCoordinator, ArchiveCoordinatorBuilder, BatchContext, BatchRequest,
    ExecutionMode,
};
pub use error::{BackendFailure, DispatchError, NoCandidatesReason, RetryHint};
pub use item::WorkItem;
pub use outcome::{ArchiveOutcome, Disposition, ExistingArchive, MementoSource};
pub use queue::ConcurrentArchiveQueue;
