//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (preferences reference existing backends)
//! - Validate value ranges (thresholds > 0, templates well-formed)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use crate::config::schema::DispatchConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("queue.max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("breaker.{0} must be greater than zero")]
    ZeroBreakerThreshold(&'static str),

    #[error(
        "breaker.failure_threshold ({failure_threshold}) must not exceed breaker.volume_threshold ({volume_threshold})"
    )]
    FailureThresholdExceedsVolume {
        failure_threshold: u32,
        volume_threshold: u32,
    },

    #[error("traffic.{0} must be a positive finite number")]
    InvalidTrafficValue(&'static str),

    #[error("backend id must not be empty")]
    EmptyBackendId,

    #[error("duplicate backend id '{0}'")]
    DuplicateBackend(String),

    #[error("backend '{0}' endpoint_template is not a valid URL template")]
    InvalidEndpoint(String),

    #[error("preferences.fallback_order references unknown backend '{0}'")]
    UnknownFallbackBackend(String),

    #[error("retries.max_attempts must be at least 1")]
    ZeroRetryAttempts,
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.queue.max_concurrency == 0 {
        errors.push(ValidationError::ZeroConcurrency);
    }

    let breaker = &config.breaker;
    for (name, value) in [
        ("failure_threshold", breaker.failure_threshold),
        ("success_threshold", breaker.success_threshold),
        ("volume_threshold", breaker.volume_threshold),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroBreakerThreshold(name));
        }
    }
    // The window never holds more than volume_threshold outcomes.
    if breaker.failure_threshold > breaker.volume_threshold {
        errors.push(ValidationError::FailureThresholdExceedsVolume {
            failure_threshold: breaker.failure_threshold,
            volume_threshold: breaker.volume_threshold,
        });
    }

    let traffic = &config.traffic;
    for (name, value) in [
        ("score_per_second", traffic.score_per_second),
        ("jam_threshold", traffic.jam_threshold),
    ] {
        if !value.is_finite() || value <= 0.0 {
            errors.push(ValidationError::InvalidTrafficValue(name));
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::ZeroRetryAttempts);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if backend.id.trim().is_empty() {
            errors.push(ValidationError::EmptyBackendId);
            continue;
        }
        if !seen.insert(backend.id.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.id.clone()));
        }
        let probe = backend.endpoint_template.replace("{url}", "example.org");
        if url::Url::parse(&probe).is_err() {
            errors.push(ValidationError::InvalidEndpoint(backend.id.clone()));
        }
    }

    // An empty backend list means backends are registered in code.
    if !config.backends.is_empty() {
        for id in &config.preferences.fallback_order {
            if !seen.contains(id.as_str()) {
                errors.push(ValidationError::UnknownFallbackBackend(id.clone()));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
