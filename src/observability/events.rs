//! Outward notifications for alerting and progress UIs.
//!
//! # Responsibilities
//! - Carry breaker transitions, jam detections and batch progress out of the core
//! - Offer log, channel and no-op sinks
//!
//! # Design Decisions
//! - Fire-and-forget: sinks never return anything the core acts on
//! - Events carry no scheduling authority

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::resilience::circuit_breaker::CircuitState;

/// A circuit breaker changed state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerTransition {
    pub backend_id: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Progress of a running batch, emitted after every completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Per-backend traffic rendering, e.g. `archivetoday: JAMMED | internetarchive: 1.2`.
    pub traffic_summary: String,
}

impl BatchProgress {
    pub fn percent(&self) -> usize {
        percent(self.completed, self.total)
    }

    /// One-line rendering for progress headlines.
    pub fn headline(&self) -> String {
        let mut headline = format!(
            "Archiving ({}/{} - {}%)",
            self.completed,
            self.total,
            self.percent()
        );
        if !self.traffic_summary.is_empty() && self.traffic_summary != crate::health::NO_TRAFFIC_DATA {
            headline.push_str(" | ");
            headline.push_str(&self.traffic_summary);
        }
        headline
    }
}

/// Final tally of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn headline(&self) -> String {
        format!(
            "Complete: {} archived, {} failed ({}%)",
            self.succeeded,
            self.failed,
            percent(self.succeeded, self.total)
        )
    }
}

fn percent(part: usize, total: usize) -> usize {
    if total == 0 {
        0
    } else {
        ((part as f64 / total as f64) * 100.0).round() as usize
    }
}

/// Everything the dispatcher reports outward.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    BreakerTransition(BreakerTransition),
    BackendJammed { backend_id: String, score: f64 },
    Progress(BatchProgress),
    BatchFinished(BatchSummary),
}

/// Receiver of dispatcher events.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: DispatchEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: DispatchEvent) {}
}

/// Writes events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&self, event: DispatchEvent) {
        match event {
            DispatchEvent::BreakerTransition(t) => {
                if t.to == CircuitState::Open {
                    tracing::error!(backend_id = %t.backend_id, from = %t.from, to = %t.to, "Circuit breaker state change");
                } else {
                    tracing::warn!(backend_id = %t.backend_id, from = %t.from, to = %t.to, "Circuit breaker state change");
                }
            }
            DispatchEvent::BackendJammed { backend_id, score } => {
                tracing::warn!(backend_id = %backend_id, score, "Backend jammed for the rest of the batch");
            }
            DispatchEvent::Progress(progress) => {
                tracing::info!(completed = progress.completed, total = progress.total, "{}", progress.headline());
            }
            DispatchEvent::BatchFinished(summary) => {
                tracing::info!(total = summary.total, "{}", summary.headline());
            }
        }
    }
}

/// Forwards events over an unbounded channel; send failures are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: DispatchEvent) {
        let _ = self.tx.send(event);
    }
}
