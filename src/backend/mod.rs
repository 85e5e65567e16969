//! Archive backends.
//!
//! # Responsibilities
//! - Define the contract every archiving service implements
//! - Classify backend failures so breakers count only real outages
//! - Hold backends in registry order
//!
//! # Data Flow
//! ```text
//! Coordinator picks a backend id
//!     → registry.rs (resolve id to backend)
//!     → ArchiveBackend::archive (http.rs for configured services)
//!     → ArchiveReceipt or classified BackendError
//! ```

pub mod http;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::dispatch::item::WorkItem;
use crate::resilience::retries::FailurePolicy;

pub use http::HttpBackend;
pub use registry::{BackendRegistry, StaticRegistry};

/// A remote archiving service.
#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    fn id(&self) -> &str;

    /// Display name; defaults to the id.
    fn name(&self) -> &str {
        self.id()
    }

    async fn is_available(&self) -> bool;

    async fn archive(&self, item: &WorkItem) -> Result<ArchiveReceipt, BackendError>;
}

/// A successful archive submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveReceipt {
    pub archived_url: String,
    pub message: Option<String>,
}

impl ArchiveReceipt {
    pub fn new(archived_url: impl Into<String>) -> Self {
        Self {
            archived_url: archived_url.into(),
            message: None,
        }
    }
}

/// Why a backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    RateLimit,
    AuthRequired,
    Blocked,
    NotFound,
    ServerError,
    Timeout,
    InvalidUrl,
    Unknown,
}

impl FailureKind {
    /// Whether this failure says something about the backend's health.
    pub fn is_backend_failure(self) -> bool {
        matches!(
            self,
            FailureKind::ServerError | FailureKind::Timeout | FailureKind::RateLimit | FailureKind::Unknown
        )
    }

    /// Whether an immediate retry may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::ServerError | FailureKind::Timeout | FailureKind::Unknown)
    }
}

/// A classified backend failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: FailureKind,
    pub message: String,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
}

impl BackendError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Counts server errors, timeouts, rate limits and unclassified errors
/// against a backend; client-side failures are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendFailurePolicy;

impl FailurePolicy<BackendError> for BackendFailurePolicy {
    fn is_failure(&self, error: &BackendError) -> bool {
        error.kind.is_backend_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_policy_ignores_client_errors() {
        let policy = BackendFailurePolicy;
        assert!(policy.is_failure(&BackendError::new(FailureKind::ServerError, "502")));
        assert!(policy.is_failure(&BackendError::new(FailureKind::RateLimit, "429")));
        assert!(!policy.is_failure(&BackendError::new(FailureKind::NotFound, "404")));
        assert!(!policy.is_failure(&BackendError::new(FailureKind::InvalidUrl, "ftp://")));
        assert!(!policy.is_failure(&BackendError::new(FailureKind::AuthRequired, "401")));
    }

    #[test]
    fn test_error_displays_message() {
        let err = BackendError::new(FailureKind::Timeout, "Request timed out").with_status(504);
        assert_eq!(err.to_string(), "Request timed out");
        assert_eq!(err.status, Some(504));
    }
}
