//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls are rejected without being made
//! - Half-Open: a limited number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= failure_threshold within the last volume_threshold attempts
//! Open → Half-Open: open_timeout elapsed (checked lazily on next access)
//! Half-Open → Closed: success_threshold consecutive probe successes
//! Half-Open → Open: first counted probe failure
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - Rejections are never counted as failures
//! - The caller's FailurePolicy decides which errors count
//! - Transitions are published to the event sink after the lock is released
//! - Every transition or reset starts a new period; calls admitted in an
//!   earlier period only count toward the totals when they settle

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::observability::events::{BreakerTransition, DispatchEvent, EventSink};
use crate::observability::metrics;
use crate::resilience::retries::FailurePolicy;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

/// A call the breaker refused to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerRejection {
    pub backend_id: String,
    pub state: CircuitState,
    /// Time left until a probe is allowed, when known.
    pub retry_in: Option<Duration>,
}

impl fmt::Display for BreakerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            CircuitState::HalfOpen => f.write_str("circuit breaker half-open, probe already in flight"),
            _ => f.write_str("circuit breaker open"),
        }
    }
}

impl std::error::Error for BreakerRejection {}

/// Result of a guarded call that did not succeed.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker refused the call; the operation was never invoked.
    Rejected(BreakerRejection),
    /// The operation ran and failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Rejected(rejection) => rejection.fmt(f),
            BreakerError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Rejected(rejection) => Some(rejection),
            BreakerError::Inner(e) => Some(e),
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub backend_id: String,
    pub state: CircuitState,
    /// Counted failures in the rolling window.
    pub failure_count: u32,
    /// Consecutive half-open probe successes.
    pub success_count: u32,
    /// Attempts in the rolling window.
    pub window_attempts: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub rejected_calls: u64,
    pub last_transition: DateTime<Utc>,
    pub thresholds: BreakerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallResult {
    Success,
    Failure,
    Ignored,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Last `volume_threshold` attempts while closed; `true` marks a counted failure.
    window: VecDeque<bool>,
    consecutive_successes: u32,
    probes_in_flight: u32,
    /// Bumped whenever the counters above are reset.
    epoch: u64,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    rejected_calls: u64,
    entered_state: Instant,
    last_transition: DateTime<Utc>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            consecutive_successes: 0,
            probes_in_flight: 0,
            epoch: 0,
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            rejected_calls: 0,
            entered_state: Instant::now(),
            last_transition: Utc::now(),
        }
    }

    fn window_failures(&self) -> u32 {
        self.window.iter().filter(|failed| **failed).count() as u32
    }

    fn transition(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.start_period();
        self.entered_state = Instant::now();
        self.last_transition = Utc::now();
        Some((from, to))
    }

    fn start_period(&mut self) {
        self.window.clear();
        self.consecutive_successes = 0;
        self.probes_in_flight = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// Per-backend circuit breaker.
pub struct CircuitBreaker {
    backend_id: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("backend_id", &self.backend_id)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(backend_id: impl Into<String>, config: BreakerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            backend_id: backend_id.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            sink,
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Run `operation` unless the breaker is open.
    pub async fn execute<T, E, F, Fut, P>(&self, operation: F, policy: &P) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FailurePolicy<E> + ?Sized,
    {
        let mut guard = self.admit().map_err(BreakerError::Rejected)?;
        match operation().await {
            Ok(value) => {
                guard.settle(CallResult::Success);
                Ok(value)
            }
            Err(e) => {
                let result = if policy.is_failure(&e) {
                    CallResult::Failure
                } else {
                    CallResult::Ignored
                };
                guard.settle(result);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Like [`execute`](Self::execute), but a rejection produces `fallback`'s value.
    pub async fn execute_with_fallback<T, E, F, Fut, P, Fb>(
        &self,
        operation: F,
        policy: &P,
        fallback: Fb,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FailurePolicy<E> + ?Sized,
        Fb: FnOnce(BreakerRejection) -> T,
    {
        match self.execute(operation, policy).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Rejected(rejection)) => Ok(fallback(rejection)),
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }

    /// Current state, applying a due Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        let (state, transitions) = {
            let mut inner = self.lock();
            let transitions = self.check_timeout(&mut inner);
            (inner.state, transitions)
        };
        self.publish(transitions);
        state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (snapshot, transitions) = {
            let mut inner = self.lock();
            let transitions = self.check_timeout(&mut inner);
            let snapshot = BreakerSnapshot {
                backend_id: self.backend_id.clone(),
                state: inner.state,
                failure_count: inner.window_failures(),
                success_count: inner.consecutive_successes,
                window_attempts: inner.window.len() as u32,
                total_calls: inner.total_calls,
                total_failures: inner.total_failures,
                total_successes: inner.total_successes,
                rejected_calls: inner.rejected_calls,
                last_transition: inner.last_transition,
                thresholds: self.config.clone(),
            };
            (snapshot, transitions)
        };
        self.publish(transitions);
        snapshot
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            let transition = inner.transition(CircuitState::Closed);
            if transition.is_none() {
                inner.start_period();
            }
            transition
        };
        self.publish(transition.into_iter().collect());
    }

    /// Force the breaker open; it will probe again after `open_timeout`.
    pub fn trip(&self) {
        let transition = self.lock().transition(CircuitState::Open);
        self.publish(transition.into_iter().collect());
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn check_timeout(&self, inner: &mut BreakerInner) -> Vec<(CircuitState, CircuitState)> {
        if inner.state == CircuitState::Open && inner.entered_state.elapsed() >= self.config.open_timeout() {
            inner.transition(CircuitState::HalfOpen).into_iter().collect()
        } else {
            Vec::new()
        }
    }

    fn admit(&self) -> Result<CallGuard<'_>, BreakerRejection> {
        let (admitted, transitions) = {
            let mut inner = self.lock();
            let transitions = self.check_timeout(&mut inner);
            let admitted = match inner.state {
                CircuitState::Open => {
                    inner.rejected_calls += 1;
                    let retry_in = self.config.open_timeout().checked_sub(inner.entered_state.elapsed());
                    Err(BreakerRejection {
                        backend_id: self.backend_id.clone(),
                        state: CircuitState::Open,
                        retry_in,
                    })
                }
                CircuitState::HalfOpen if inner.probes_in_flight >= self.config.success_threshold => {
                    inner.rejected_calls += 1;
                    Err(BreakerRejection {
                        backend_id: self.backend_id.clone(),
                        state: CircuitState::HalfOpen,
                        retry_in: None,
                    })
                }
                CircuitState::HalfOpen => {
                    inner.probes_in_flight += 1;
                    inner.total_calls += 1;
                    Ok((true, inner.epoch))
                }
                CircuitState::Closed => {
                    inner.total_calls += 1;
                    Ok((false, inner.epoch))
                }
            };
            (admitted, transitions)
        };
        self.publish(transitions);

        match admitted {
            Ok((probe, epoch)) => Ok(CallGuard {
                breaker: self,
                probe,
                epoch,
                settled: false,
            }),
            Err(rejection) => {
                tracing::debug!(backend_id = %self.backend_id, state = %rejection.state, "Call rejected by circuit breaker");
                Err(rejection)
            }
        }
    }

    fn record(&self, probe: bool, epoch: u64, result: CallResult) {
        let transition = {
            let mut inner = self.lock();
            match result {
                CallResult::Success => inner.total_successes += 1,
                CallResult::Failure => inner.total_failures += 1,
                CallResult::Ignored => {}
            }

            if epoch != inner.epoch {
                tracing::trace!(backend_id = %self.backend_id, "Ignoring call admitted before the last transition");
                return;
            }
            if probe {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            }

            match (inner.state, result) {
                (CircuitState::HalfOpen, CallResult::Success) if probe => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        inner.transition(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, CallResult::Failure) if probe => inner.transition(CircuitState::Open),
                (CircuitState::Closed, _) => {
                    inner.window.push_back(result == CallResult::Failure);
                    while inner.window.len() > self.config.volume_threshold as usize {
                        inner.window.pop_front();
                    }
                    if inner.window.len() >= self.config.volume_threshold as usize
                        && inner.window_failures() >= self.config.failure_threshold
                    {
                        inner.transition(CircuitState::Open)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        self.publish(transition.into_iter().collect());
    }

    fn publish(&self, transitions: Vec<(CircuitState, CircuitState)>) {
        for (from, to) in transitions {
            tracing::info!(backend_id = %self.backend_id, from = %from, to = %to, "Circuit breaker transition");
            metrics::record_breaker_state(&self.backend_id, to);
            self.sink.notify(DispatchEvent::BreakerTransition(BreakerTransition {
                backend_id: self.backend_id.clone(),
                from,
                to,
                at: Utc::now(),
            }));
        }
    }
}

/// Tracks one admitted call. Dropped unsettled (panic or cancellation), the
/// call is recorded as neither success nor failure so probe slots are released.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    /// Period the call was admitted in.
    epoch: u64,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, result: CallResult) {
        self.settled = true;
        self.breaker.record(self.probe, self.epoch, result);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.probe, self.epoch, CallResult::Ignored);
        }
    }
}
