//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the archive dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    /// Concurrent queue settings.
    pub queue: QueueConfig,

    /// Per-backend circuit breaker thresholds.
    pub breaker: BreakerConfig,

    /// Latency scoring and jam detection.
    pub traffic: TrafficConfig,

    /// User-facing archiving preferences (fallback order, memento pre-check).
    pub preferences: ArchivePreferences,

    /// Remote memento lookup settings.
    pub memento: MementoConfig,

    /// Retry settings for the bundled HTTP backend.
    pub retries: RetryConfig,

    /// Archive backend definitions, in registry order.
    pub backends: Vec<BackendConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Concurrent queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum items in flight at once. Clamped to 1..=8 at runtime.
    pub max_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

/// Circuit breaker thresholds, shared by every backend's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Counted failures within the rolling window needed to open.
    pub failure_threshold: u32,

    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,

    /// Seconds spent open before a probe is allowed.
    pub open_timeout_secs: u64,

    /// Minimum attempts in the rolling window before the breaker may open.
    pub volume_threshold: u32,
}

impl BreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_secs: 60,
            volume_threshold: 10,
        }
    }
}

/// Traffic monitor configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Grace period before a call's timing window opens, in milliseconds.
    pub grace_period_ms: u64,

    /// Score added per second of active duration.
    pub score_per_second: f64,

    /// A single score at or above this marks the backend jammed.
    pub jam_threshold: f64,

    /// Timing windows older than this are dropped by `prune_stale`.
    pub stale_timer_secs: u64,
}

impl TrafficConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_timer_secs)
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
            score_per_second: 0.1,
            jam_threshold: 2.0,
            stale_timer_secs: 300,
        }
    }
}

/// Archiving preferences. Read-only from the dispatcher's point of view.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchivePreferences {
    /// Backend ids tried first, in this order.
    pub fallback_order: Vec<String>,

    /// Backend used by single-item auto-archiving.
    pub default_backend: String,

    /// Look for an existing memento before archiving.
    pub check_before_archive: bool,

    /// Mementos younger than this count as fresh.
    pub archive_age_threshold_hours: u64,

    /// Reuse a fresh memento instead of handing it back for a decision.
    pub skip_existing_mementos: bool,
}

impl ArchivePreferences {
    /// Freshness window for existing mementos. Saturates at `TimeDelta::MAX`.
    pub fn archive_age_threshold(&self) -> chrono::TimeDelta {
        i64::try_from(self.archive_age_threshold_hours)
            .ok()
            .and_then(chrono::TimeDelta::try_hours)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl Default for ArchivePreferences {
    fn default() -> Self {
        Self {
            fallback_order: vec![
                "internetarchive".to_string(),
                "archivetoday".to_string(),
                "arquivopt".to_string(),
                "permacc".to_string(),
                "ukwebarchive".to_string(),
            ],
            default_backend: "internetarchive".to_string(),
            check_before_archive: true,
            archive_age_threshold_hours: 24,
            skip_existing_mementos: false,
        }
    }
}

/// Remote memento lookup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MementoConfig {
    /// Enable remote TimeMap lookups.
    pub enabled: bool,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Aggregator TimeMaps, all queried on every lookup.
    pub aggregators: Vec<TimeMapProvider>,

    /// Per-archive TimeMaps, merged when no aggregator knows the URL.
    pub archives: Vec<TimeMapProvider>,
}

impl Default for MementoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            aggregators: vec![
                TimeMapProvider {
                    name: "Time Travel".to_string(),
                    timemap_url: "http://timetravel.mementoweb.org/timemap/json/".to_string(),
                },
                TimeMapProvider {
                    name: "MemGator".to_string(),
                    timemap_url: "https://memgator.cs.odu.edu/timemap/json/".to_string(),
                },
            ],
            archives: vec![
                TimeMapProvider {
                    name: "Internet Archive".to_string(),
                    timemap_url: "https://web.archive.org/web/timemap/json/".to_string(),
                },
                TimeMapProvider {
                    name: "UK Web Archive".to_string(),
                    timemap_url: "https://www.webarchive.org.uk/wayback/timemap/json/"
                        .to_string(),
                },
                TimeMapProvider {
                    name: "Arquivo.pt".to_string(),
                    timemap_url: "https://arquivo.pt/wayback/timemap/json/".to_string(),
                },
            ],
        }
    }
}

/// A TimeMap endpoint (JSON or link format). The target URL is appended to `timemap_url`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeMapProvider {
    pub name: String,
    pub timemap_url: String,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per backend call, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

/// HTTP method used for an archive submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmitMethod {
    #[default]
    Get,
    Post,
}

/// Archive backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub id: String,

    /// Display name for logs.
    #[serde(default)]
    pub name: Option<String>,

    /// Submission URL; `{url}` is replaced by the percent-encoded target.
    pub endpoint_template: String,

    #[serde(default)]
    pub method: SubmitMethod,

    /// Response header carrying the archived URL.
    #[serde(default = "default_result_header")]
    pub result_header: String,

    /// Request timeout in seconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Disabled backends fail their availability check.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_result_header() -> String {
    "content-location".to_string()
}

fn default_backend_timeout() -> u64 {
    120
}

fn default_enabled() -> bool {
    true
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output.
    pub json_logs: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
