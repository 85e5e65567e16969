//! Bounded-concurrency archive queue.
//!
//! # Responsibilities
//! - Run at most `max_concurrency` archive operations at once
//! - Admit the next item as soon as any active one settles
//! - Return outcomes in submission order
//! - Report progress after every completion
//!
//! # Design Decisions
//! - Completion queue (`FuturesUnordered`) tagged with submission index
//! - Errors and panics inside one operation fail only that item
//!
//! # Data Flow
//! ```text
//! items ──fill to max──→ FuturesUnordered ──next completion──→ results[index]
//!   ↑                                                  │
//!   └────────────── admit exactly one more ────────────┘
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};

use crate::dispatch::error::DispatchError;
use crate::dispatch::item::WorkItem;
use crate::dispatch::outcome::ArchiveOutcome;
use crate::health::traffic::TrafficMonitor;
use crate::health::NO_TRAFFIC_DATA;
use crate::observability::events::{BatchProgress, BatchSummary, DispatchEvent, EventSink, NullSink};
use crate::observability::metrics;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Runs an archive operation over a batch with bounded parallelism.
pub struct ConcurrentArchiveQueue {
    max_concurrency: usize,
    sink: Arc<dyn EventSink>,
    traffic: Option<Arc<TrafficMonitor>>,
}

impl Default for ConcurrentArchiveQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl ConcurrentArchiveQueue {
    /// `max_concurrency` is clamped to `[1, 8]`.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
            sink: Arc::new(NullSink),
            traffic: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Include this monitor's summary in progress events.
    pub fn with_traffic(mut self, traffic: Arc<TrafficMonitor>) -> Self {
        self.traffic = Some(traffic);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Archive every item with `archive_fn`; one outcome per item, in order.
    pub async fn process<F, Fut>(&self, items: &[WorkItem], archive_fn: F) -> Vec<ArchiveOutcome>
    where
        F: Fn(WorkItem) -> Fut,
        Fut: Future<Output = Result<ArchiveOutcome, DispatchError>>,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let run = |index: usize, item: WorkItem| {
            let operation = archive_fn(item.clone());
            settle(item, operation).map(move |outcome| (index, outcome))
        };

        let mut results: Vec<Option<ArchiveOutcome>> = vec![None; total];
        let mut queued = items.iter().cloned().enumerate();
        let mut active = FuturesUnordered::new();
        for (index, item) in queued.by_ref().take(self.max_concurrency) {
            active.push(run(index, item));
        }
        metrics::record_in_flight(active.len());
        tracing::debug!(total, max_concurrency = self.max_concurrency, "Archive queue started");

        let (mut succeeded, mut failed) = (0, 0);
        while let Some((index, outcome)) = active.next().await {
            if outcome.success {
                succeeded += 1;
            } else {
                failed += 1;
            }
            results[index] = Some(outcome);

            if let Some((next_index, next_item)) = queued.next() {
                active.push(run(next_index, next_item));
            }
            metrics::record_in_flight(active.len());

            self.sink.notify(DispatchEvent::Progress(BatchProgress {
                completed: succeeded + failed,
                total,
                succeeded,
                failed,
                traffic_summary: self.traffic_summary(),
            }));
        }

        let summary = BatchSummary { total, succeeded, failed };
        tracing::info!(total, succeeded, failed, "{}", summary.headline());
        self.sink.notify(DispatchEvent::BatchFinished(summary));

        results
            .into_iter()
            .zip(items)
            .map(|(outcome, item)| {
                outcome.unwrap_or_else(|| {
                    ArchiveOutcome::failed(item.clone(), DispatchError::TaskFailed("Item was not processed".to_string()))
                })
            })
            .collect()
    }

    fn traffic_summary(&self) -> String {
        self.traffic
            .as_ref()
            .map_or_else(|| NO_TRAFFIC_DATA.to_string(), |t| t.summary())
    }
}

/// Await one archive operation; an error or panic becomes a failed outcome for `item`.
pub(crate) async fn settle<Fut>(item: WorkItem, operation: Fut) -> ArchiveOutcome
where
    Fut: Future<Output = Result<ArchiveOutcome, DispatchError>>,
{
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(error)) => ArchiveOutcome::failed(item, error),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(item = %item.key, error = %message, "Archive task panicked");
            ArchiveOutcome::failed(item, DispatchError::TaskFailed(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "archive task panicked".to_string()
    }
}
