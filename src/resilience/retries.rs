//! Failure classification and retry logic.
//!
//! # Responsibilities
//! - Let callers decide which errors count against a backend
//! - Execute retries with exponential backoff + jitter
//!
//! # Design Decisions
//! - Classification is supplied by the caller, never hard-coded in the breaker
//! - Only transient failures are retried; a rejected input fails immediately

use std::future::Future;

use crate::config::RetryConfig;
use crate::resilience::backoff::backoff_delay;

/// Decides whether an error is a backend failure for breaker accounting.
pub trait FailurePolicy<E: ?Sized> {
    fn is_failure(&self, error: &E) -> bool;
}

impl<E: ?Sized, F> FailurePolicy<E> for F
where
    F: Fn(&E) -> bool,
{
    fn is_failure(&self, error: &E) -> bool {
        self(error)
    }
}

/// Counts every error as a failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountAllFailures;

impl<E: ?Sized> FailurePolicy<E> for CountAllFailures {
    fn is_failure(&self, _error: &E) -> bool {
        true
    }
}

/// Run `operation` up to `config.max_attempts` times.
///
/// `operation` receives the 1-based attempt number. Errors for which
/// `retryable` returns false are returned immediately.
pub async fn with_retries<T, E, F, Fut, R>(
    config: &RetryConfig,
    retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && retryable(&e) => {
                let delay = backoff_delay(attempt, config);
                tracing::info!(attempt, delay = ?delay, error = %e, "Retrying request");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
