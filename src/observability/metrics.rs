//! Metrics collection and exposition.
//!
//! # Metrics
//! - `archive_outcomes_total` (counter): final item outcomes by backend, result
//! - `archive_backend_attempts_total` (counter): backend calls by backend, result
//! - `archive_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `archive_traffic_score` (histogram): committed latency scores
//! - `archive_backend_jammed` (gauge): 1=jammed in current batch
//! - `archive_queue_in_flight` (gauge): items currently being archived
//!
//! # Design Decisions
//! - Recorders are free functions over the `metrics` facade; without an
//!   installed exporter they are no-ops

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_outcome(backend: Option<&str>, result: &'static str) {
    metrics::counter!(
        "archive_outcomes_total",
        "backend" => backend.unwrap_or("none").to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_backend_attempt(backend: &str, result: &'static str) {
    metrics::counter!(
        "archive_backend_attempts_total",
        "backend" => backend.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_breaker_state(backend: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!("archive_breaker_state", "backend" => backend.to_string()).set(value);
}

pub fn record_traffic_score(backend: &str, score: f64) {
    metrics::histogram!("archive_traffic_score", "backend" => backend.to_string()).record(score);
}

pub fn record_jammed(backend: &str, jammed: bool) {
    metrics::gauge!("archive_backend_jammed", "backend" => backend.to_string())
        .set(if jammed { 1.0 } else { 0.0 });
}

pub fn record_in_flight(count: usize) {
    metrics::gauge!("archive_queue_in_flight").set(count as f64);
}
