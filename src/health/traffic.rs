//! Latency scoring and jam detection.
//!
//! # Responsibilities
//! - Time backend calls that outlast the grace period
//! - Convert active time into scores and aggregate them per backend
//! - Flag a backend as jammed for the rest of the batch
//!
//! # Design Decisions
//! - Calls that finish inside the grace period record nothing
//! - A single score at or over the jam threshold jams the backend
//! - Timers live in a map keyed by request id so concurrent calls to the
//!   same backend never share state

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::TrafficConfig;
use crate::health::NO_TRAFFIC_DATA;
use crate::observability::events::{DispatchEvent, EventSink};
use crate::observability::metrics;

/// Identifies one timed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Aggregated scores for one backend in the current batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrafficStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub jammed: bool,
}

/// Snapshot of the monitor for debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficDebugState {
    pub active_requests: usize,
    pub jammed_count: usize,
    pub batch_age: Duration,
    pub backends: BTreeMap<String, TrafficStats>,
}

#[derive(Debug, Clone)]
struct ActiveTimer {
    backend_id: String,
    opened: Instant,
}

/// Batch-scoped latency monitor shared by every in-flight call.
pub struct TrafficMonitor {
    config: TrafficConfig,
    timers: DashMap<RequestId, ActiveTimer>,
    scores: DashMap<String, Vec<f64>>,
    jammed: DashSet<String>,
    batch_started: Mutex<Instant>,
    sink: Arc<dyn EventSink>,
}

impl TrafficMonitor {
    pub fn new(config: TrafficConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            timers: DashMap::new(),
            scores: DashMap::new(),
            jammed: DashSet::new(),
            batch_started: Mutex::new(Instant::now()),
            sink,
        }
    }

    /// Open the timing window for `id`. Called once the grace period has elapsed.
    pub fn start_request(&self, id: RequestId, backend_id: &str) {
        tracing::debug!(request_id = %id, backend_id = %backend_id, "Traffic timing window opened");
        self.timers.insert(
            id,
            ActiveTimer {
                backend_id: backend_id.to_string(),
                opened: Instant::now(),
            },
        );
    }

    /// Close the timing window for `id` and score it. No-op if the window never opened.
    pub fn end_request(&self, id: RequestId, success: bool) {
        let Some((_, timer)) = self.timers.remove(&id) else {
            return;
        };

        let active = timer.opened.elapsed().as_secs_f64();
        let score = active * self.config.score_per_second;

        if score >= self.config.jam_threshold && self.jammed.insert(timer.backend_id.clone()) {
            tracing::warn!(backend_id = %timer.backend_id, score, success, "Backend jammed");
            metrics::record_jammed(&timer.backend_id, true);
            self.sink.notify(DispatchEvent::BackendJammed {
                backend_id: timer.backend_id.clone(),
                score,
            });
        }

        if score.is_finite() && score > 0.0 {
            metrics::record_traffic_score(&timer.backend_id, score);
            self.scores
                .entry(timer.backend_id.clone())
                .or_default()
                .push(score);
            tracing::debug!(backend_id = %timer.backend_id, score, success, "Traffic score recorded");
        }
    }

    /// Time `operation` against `backend_id`.
    ///
    /// The window opens when the grace period elapses and closes when the
    /// operation settles, scoring `result.is_ok()` as the call's success.
    pub async fn observe<T, E, F>(&self, backend_id: &str, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let id = RequestId::new();
        let grace = tokio::time::sleep(self.config.grace_period());
        tokio::pin!(grace);
        tokio::pin!(operation);

        let mut window_open = false;
        let result = loop {
            tokio::select! {
                biased;
                result = &mut operation => break result,
                _ = &mut grace, if !window_open => {
                    window_open = true;
                    self.start_request(id, backend_id);
                }
            }
        };

        self.end_request(id, result.is_ok());
        result
    }

    /// Clear timers, scores and jam flags for a new batch.
    pub fn reset_batch(&self) {
        for backend_id in self.jammed.iter() {
            metrics::record_jammed(backend_id.key(), false);
        }
        self.timers.clear();
        self.scores.clear();
        self.jammed.clear();
        *self.batch_started.lock().expect("traffic monitor mutex poisoned") = Instant::now();
        tracing::debug!("Traffic batch state reset");
    }

    pub fn is_jammed(&self, backend_id: &str) -> bool {
        self.jammed.contains(backend_id)
    }

    /// Jammed backends, sorted.
    pub fn jammed_backends(&self) -> Vec<String> {
        let mut jammed: Vec<_> = self.jammed.iter().map(|id| id.key().clone()).collect();
        jammed.sort();
        jammed
    }

    pub fn stats(&self, backend_id: &str) -> TrafficStats {
        let jammed = self.is_jammed(backend_id);
        let Some(scores) = self.scores.get(backend_id) else {
            return TrafficStats { jammed, ..TrafficStats::default() };
        };
        if scores.is_empty() {
            return TrafficStats { jammed, ..TrafficStats::default() };
        }

        let count = scores.len();
        let sum: f64 = scores.iter().sum();
        TrafficStats {
            mean: sum / count as f64,
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count,
            jammed,
        }
    }

    /// One-line rendering, e.g. `archivetoday: JAMMED | internetarchive: 1.2`.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .known_backends()
            .into_iter()
            .filter_map(|backend_id| {
                if self.is_jammed(&backend_id) {
                    return Some(format!("{backend_id}: JAMMED"));
                }
                let mean = self.stats(&backend_id).mean;
                (mean > 0.0).then(|| format!("{backend_id}: {mean:.1}"))
            })
            .collect();

        if parts.is_empty() {
            NO_TRAFFIC_DATA.to_string()
        } else {
            parts.join(" | ")
        }
    }

    pub fn debug_state(&self) -> TrafficDebugState {
        let batch_started = *self.batch_started.lock().expect("traffic monitor mutex poisoned");
        TrafficDebugState {
            active_requests: self.timers.len(),
            jammed_count: self.jammed.len(),
            batch_age: batch_started.elapsed(),
            backends: self
                .known_backends()
                .into_iter()
                .map(|backend_id| {
                    let stats = self.stats(&backend_id);
                    (backend_id, stats)
                })
                .collect(),
        }
    }

    /// Drop timing windows opened more than `max_age` ago. Returns how many were dropped.
    pub fn prune_stale(&self, max_age: Duration) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, timer| timer.opened.elapsed() <= max_age);
        let pruned = before.saturating_sub(self.timers.len());
        if pruned > 0 {
            tracing::debug!(pruned, "Dropped stale traffic timers");
        }
        pruned
    }

    /// [`prune_stale`](Self::prune_stale) with the configured stale age.
    pub fn prune_stale_default(&self) -> usize {
        self.prune_stale(self.config.stale_after())
    }

    fn known_backends(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scores.iter().map(|e| e.key().clone()).collect();
        for id in self.jammed.iter() {
            if !ids.contains(id.key()) {
                ids.push(id.key().clone());
            }
        }
        ids.sort();
        ids
    }
}
