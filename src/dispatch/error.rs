//! Dispatch error taxonomy.

use std::fmt;

use serde::Serialize;

use crate::backend::FailureKind;

/// Why no backend could be tried for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoCandidatesReason {
    /// No backend passed its availability check.
    Unavailable,
    /// Every available backend is jammed for this batch.
    Jammed,
    /// Every remaining backend's circuit breaker is open.
    BreakerLockout,
}

impl fmt::Display for NoCandidatesReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoCandidatesReason::Unavailable => "No archive backends available",
            NoCandidatesReason::Jammed => {
                "No non-jammed archive backends available - consider retrying later"
            }
            NoCandidatesReason::BreakerLockout => {
                "No archive backends available (all circuit breakers OPEN) - consider retrying later"
            }
        })
    }
}

/// One backend's contribution to an exhausted fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    pub backend_id: String,
    pub message: String,
    /// `None` when the backend was skipped without being called.
    pub kind: Option<FailureKind>,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend_id, self.message)
    }
}

/// How a caller should treat a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryHint {
    /// Transient failure; retrying immediately may succeed.
    RetryNow,
    /// Backends are shedding load; retry after the breaker or batch resets.
    RetryLater,
    /// Retrying the same input cannot succeed.
    Never,
}

/// Per-item dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Item has no URL to archive")]
    NoTarget,

    #[error("Archive backend {0} not found")]
    UnknownBackend(String),

    #[error("{backend_id}: {message}")]
    BackendRejected {
        backend_id: String,
        message: String,
        kind: FailureKind,
    },

    #[error("{backend_id}: circuit breaker open")]
    BreakerOpen { backend_id: String },

    #[error("All archive backends failed:\n{}", join_failures(.failures))]
    AllExhausted { failures: Vec<BackendFailure> },

    #[error("{reason}")]
    NoCandidates { reason: NoCandidatesReason },

    #[error("Archive task failed: {0}")]
    TaskFailed(String),
}

fn join_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn hint_for_kind(kind: FailureKind) -> RetryHint {
    if kind.is_transient() {
        RetryHint::RetryNow
    } else if kind == FailureKind::RateLimit {
        RetryHint::RetryLater
    } else {
        RetryHint::Never
    }
}

impl DispatchError {
    /// The single backend this error is about, if any.
    pub fn backend_id(&self) -> Option<&str> {
        match self {
            DispatchError::BackendRejected { backend_id, .. } | DispatchError::BreakerOpen { backend_id } => {
                Some(backend_id.as_str())
            }
            _ => None,
        }
    }

    pub fn retry_hint(&self) -> RetryHint {
        match self {
            DispatchError::NoTarget | DispatchError::UnknownBackend(_) => RetryHint::Never,
            DispatchError::BackendRejected { kind, .. } => hint_for_kind(*kind),
            DispatchError::BreakerOpen { .. } | DispatchError::NoCandidates { .. } => {
                RetryHint::RetryLater
            }
            DispatchError::TaskFailed(_) => RetryHint::RetryNow,
            DispatchError::AllExhausted { failures } => {
                let hints: Vec<RetryHint> = failures
                    .iter()
                    .map(|f| f.kind.map_or(RetryHint::RetryLater, hint_for_kind))
                    .collect();
                if hints.contains(&RetryHint::RetryNow) {
                    RetryHint::RetryNow
                } else if hints.contains(&RetryHint::RetryLater) {
                    RetryHint::RetryLater
                } else {
                    RetryHint::Never
                }
            }
        }
    }
}
