//! Top-level archive coordination.
//!
//! # Responsibilities
//! - Frame a batch: reset traffic state, snapshot preferences, compute the base order
//! - Decide per item: memento pre-check, explicit backend, or fallback chain
//! - Guard every backend call with its breaker and time it against the monitor
//! - Aggregate per-backend failures into one error
//!
//! # Data Flow
//! ```text
//! archive_items(items, request)
//!     → TrafficMonitor::reset_batch (once, non-empty batches only)
//!     → BatchContext (preferences, requested backend, base order)
//!     → Concurrent: ConcurrentArchiveQueue::process (progress events)
//!       Sequential: plain loop, one item at a time, no queue
//!         → per item: target? → memento pre-check → explicit backend | fallback chain
//!             → BreakerRegistry::breaker(id).execute(TrafficMonitor::observe(archive))
//!     → outcomes in submission order
//! ```

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use url::{Host, Url};

use crate::backend::{ArchiveBackend, ArchiveReceipt, BackendError, BackendFailurePolicy, BackendRegistry};
use crate::config::{ArchivePreferences, DispatchConfig, PreferenceSource, QueueConfig};
use crate::dispatch::error::{BackendFailure, DispatchError};
use crate::dispatch::fallback::{order_backends, select_candidates, Candidate};
use crate::dispatch::item::WorkItem;
use crate::dispatch::outcome::{ArchiveOutcome, Disposition, ExistingArchive, MementoSource};
use crate::dispatch::queue::{settle, ConcurrentArchiveQueue};
use crate::health::traffic::TrafficMonitor;
use crate::memento::{most_recent_within, MementoLookup, MementoRecord, NoMementoLookup};
use crate::observability::events::{EventSink, NullSink};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::BreakerError;
use crate::resilience::registry::BreakerRegistry;

/// How a batch's items are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Up to `max_concurrency` items at once.
    #[default]
    Concurrent,
    /// One item at a time in a plain loop; no queue progress events.
    Sequential,
}

/// Per-batch options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRequest {
    /// Dispatch only to this backend, bypassing the fallback chain.
    pub backend: Option<String>,
    pub mode: ExecutionMode,
}

impl BatchRequest {
    pub fn with_backend(backend: impl Into<String>) -> Self {
        Self {
            backend: Some(backend.into()),
            ..Self::default()
        }
    }

    pub fn sequential(mut self) -> Self {
        self.mode = ExecutionMode::Sequential;
        self
    }
}

/// State fixed for the duration of one batch.
pub struct BatchContext {
    preferences: Arc<ArchivePreferences>,
    requested: Option<String>,
    base_order: Vec<Arc<dyn ArchiveBackend>>,
}

impl BatchContext {
    pub fn requested_backend(&self) -> Option<&str> {
        self.requested.as_deref()
    }

    /// Ids of the batch's base fallback order.
    pub fn base_order(&self) -> Vec<&str> {
        self.base_order.iter().map(|b| b.id()).collect()
    }
}

/// Drives batches of work items through the backends.
pub struct ArchiveCoordinator {
    backends: Arc<dyn BackendRegistry>,
    mementos: Arc<dyn MementoLookup>,
    preferences: Arc<dyn PreferenceSource>,
    breakers: Arc<BreakerRegistry>,
    traffic: Arc<TrafficMonitor>,
    sink: Arc<dyn EventSink>,
    max_concurrency: usize,
}

impl ArchiveCoordinator {
    pub fn builder(backends: Arc<dyn BackendRegistry>) -> ArchiveCoordinatorBuilder {
        ArchiveCoordinatorBuilder::new(backends)
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn traffic(&self) -> &Arc<TrafficMonitor> {
        &self.traffic
    }

    /// Archive a batch. Returns exactly one outcome per item, in order.
    pub async fn archive_items(&self, items: &[WorkItem], request: BatchRequest) -> Vec<ArchiveOutcome> {
        if items.is_empty() {
            return Vec::new();
        }

        self.traffic.reset_batch();
        let context = self.prepare_batch(request.backend).await;
        tracing::info!(
            items = items.len(),
            requested_backend = ?context.requested,
            base_order = ?context.base_order(),
            mode = ?request.mode,
            "Starting archive batch"
        );

        let context = &context;
        let outcomes = match request.mode {
            ExecutionMode::Concurrent => {
                ConcurrentArchiveQueue::new(self.max_concurrency)
                    .with_sink(self.sink.clone())
                    .with_traffic(self.traffic.clone())
                    .process(items, |item| async move { self.archive_item(context, item).await })
                    .await
            }
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(items.len());
                for item in items {
                    outcomes.push(settle(item.clone(), self.archive_item(context, item.clone())).await);
                }
                let succeeded = outcomes.iter().filter(|o| o.success).count();
                tracing::info!(
                    total = outcomes.len(),
                    succeeded,
                    failed = outcomes.len() - succeeded,
                    "Sequential batch finished"
                );
                outcomes
            }
        };

        for outcome in &outcomes {
            metrics::record_outcome(outcome.backend_id.as_deref(), disposition_label(outcome.disposition()));
        }
        self.traffic.prune_stale_default();
        outcomes
    }

    /// Archive one item through the default backend, unless its URL is local
    /// or private. Returns `None` when skipped.
    pub async fn auto_archive(&self, item: &WorkItem) -> Option<ArchiveOutcome> {
        let target = item.target_url()?;
        if !should_auto_archive(target) {
            tracing::debug!(item = %item.key, url = %target, "Skipping auto-archive for local URL");
            return None;
        }

        let preferences = self.preferences.snapshot();
        let context = BatchContext {
            requested: Some(preferences.default_backend.clone()),
            preferences,
            base_order: Vec::new(),
        };
        let outcome = match self.archive_item(&context, item.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(item = %item.key, error = %e, "Auto-archive failed");
                ArchiveOutcome::failed(item.clone(), e)
            }
        };
        metrics::record_outcome(outcome.backend_id.as_deref(), disposition_label(outcome.disposition()));
        Some(outcome)
    }

    /// Snapshot preferences and, without an explicit backend, compute the base order.
    pub async fn prepare_batch(&self, requested: Option<String>) -> BatchContext {
        let preferences = self.preferences.snapshot();
        let base_order = if requested.is_some() {
            Vec::new()
        } else {
            let listed = self.backends.list();
            let checks = join_all(listed.iter().map(|b| b.is_available())).await;
            let available = listed
                .into_iter()
                .zip(checks)
                .filter_map(|(backend, available)| available.then_some(backend))
                .collect();
            order_backends(available, &preferences.fallback_order)
        };

        BatchContext {
            preferences,
            requested,
            base_order,
        }
    }

    /// The per-item decision sequence.
    pub async fn archive_item(&self, context: &BatchContext, item: WorkItem) -> Result<ArchiveOutcome, DispatchError> {
        let Some(target) = item.target_url().map(str::to_string) else {
            return Err(DispatchError::NoTarget);
        };

        if context.preferences.check_before_archive {
            if let Some(existing) = self.find_existing(&context.preferences, &item, &target).await {
                tracing::info!(
                    item = %item.key,
                    memento = %existing.record.url,
                    applied = existing.applied,
                    "Found recent archive"
                );
                return Ok(ArchiveOutcome::existing(item, existing, Utc::now()));
            }
        }

        if let Some(backend_id) = &context.requested {
            let backend = self
                .backends
                .get(backend_id)
                .ok_or_else(|| DispatchError::UnknownBackend(backend_id.clone()))?;
            return match self.invoke(backend.as_ref(), &item).await {
                Ok(receipt) => Ok(archived(item, backend.id(), receipt)),
                Err(BreakerError::Rejected(_)) => Err(DispatchError::BreakerOpen {
                    backend_id: backend.id().to_string(),
                }),
                Err(BreakerError::Inner(e)) => Err(DispatchError::BackendRejected {
                    backend_id: backend.id().to_string(),
                    message: e.message,
                    kind: e.kind,
                }),
            };
        }

        self.archive_with_fallback(context, item).await
    }

    async fn archive_with_fallback(&self, context: &BatchContext, item: WorkItem) -> Result<ArchiveOutcome, DispatchError> {
        let candidates = select_candidates(&context.base_order, &self.traffic, &self.breakers)
            .map_err(|reason| DispatchError::NoCandidates { reason })?;

        let mut failures: Vec<BackendFailure> = Vec::new();
        for candidate in candidates {
            let backend = match candidate {
                Candidate::Skipped(failure) => {
                    failures.push(failure);
                    continue;
                }
                Candidate::Ready(backend) => backend,
            };

            match self.invoke(backend.as_ref(), &item).await {
                Ok(receipt) => return Ok(archived(item, backend.id(), receipt)),
                Err(error) => {
                    let failure = match error {
                        BreakerError::Rejected(rejection) => BackendFailure {
                            backend_id: backend.id().to_string(),
                            message: rejection.to_string(),
                            kind: None,
                        },
                        BreakerError::Inner(e) => BackendFailure {
                            backend_id: backend.id().to_string(),
                            message: e.message,
                            kind: Some(e.kind),
                        },
                    };
                    tracing::warn!(item = %item.key, backend_id = %failure.backend_id, error = %failure.message, "Archive attempt failed, trying next backend");
                    failures.push(failure);
                }
            }
        }

        Err(DispatchError::AllExhausted { failures })
    }

    /// One guarded, timed backend call.
    async fn invoke(
        &self,
        backend: &dyn ArchiveBackend,
        item: &WorkItem,
    ) -> Result<ArchiveReceipt, BreakerError<BackendError>> {
        let breaker = self.breakers.breaker(backend.id());
        let result = breaker
            .execute(
                || self.traffic.observe(backend.id(), backend.archive(item)),
                &BackendFailurePolicy,
            )
            .await;

        let label = match &result {
            Ok(_) => "success",
            Err(BreakerError::Rejected(_)) => "rejected",
            Err(BreakerError::Inner(_)) => "failure",
        };
        metrics::record_backend_attempt(backend.id(), label);
        result
    }

    async fn find_existing(
        &self,
        preferences: &ArchivePreferences,
        item: &WorkItem,
        target: &str,
    ) -> Option<ExistingArchive> {
        let now = Utc::now();
        let max_age = preferences.archive_age_threshold();
        let existing = |record: &MementoRecord, source| ExistingArchive {
            record: record.clone(),
            source,
            applied: preferences.skip_existing_mementos,
        };

        match self.mementos.find_stored(item).await {
            Ok(records) => {
                if let Some(record) = most_recent_within(&records, max_age, now) {
                    return Some(existing(record, MementoSource::Stored));
                }
            }
            Err(e) => tracing::warn!(item = %item.key, error = %e, "Stored memento lookup failed"),
        }

        match self.mementos.lookup_remote(target).await {
            Ok(lookup) if lookup.found => {
                most_recent_within(&lookup.records, max_age, now).map(|r| existing(r, MementoSource::Remote))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(item = %item.key, error = %e, "Remote memento lookup failed");
                None
            }
        }
    }
}

fn archived(item: WorkItem, backend_id: &str, receipt: ArchiveReceipt) -> ArchiveOutcome {
    tracing::info!(item = %item.key, backend_id = %backend_id, archived_url = %receipt.archived_url, "Archived item");
    let outcome = ArchiveOutcome::archived(item, backend_id, receipt.archived_url);
    match receipt.message {
        Some(message) => outcome.with_status_message(message),
        None => outcome,
    }
}

fn disposition_label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Created => "created",
        Disposition::Reused => "reused",
        Disposition::Pending => "pending",
        Disposition::Failed => "failed",
    }
}

/// False for URLs that point at the local machine, a private network, or a
/// non-web scheme.
pub fn should_auto_archive(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    match parsed.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain != "localhost" && !domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => !is_local(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => !is_local(IpAddr::V6(ip)),
        None => false,
    }
}

fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Builder for [`ArchiveCoordinator`].
pub struct ArchiveCoordinatorBuilder {
    backends: Arc<dyn BackendRegistry>,
    mementos: Arc<dyn MementoLookup>,
    preferences: Arc<dyn PreferenceSource>,
    breakers: Option<Arc<BreakerRegistry>>,
    traffic: Option<Arc<TrafficMonitor>>,
    sink: Arc<dyn EventSink>,
    config: DispatchConfig,
}

impl ArchiveCoordinatorBuilder {
    fn new(backends: Arc<dyn BackendRegistry>) -> Self {
        Self {
            backends,
            mementos: Arc::new(NoMementoLookup),
            preferences: Arc::new(ArchivePreferences::default()),
            breakers: None,
            traffic: None,
            sink: Arc::new(NullSink),
            config: DispatchConfig::default(),
        }
    }

    /// Queue, breaker and traffic settings. Preferences are supplied separately.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.queue = QueueConfig { max_concurrency };
        self
    }

    pub fn mementos(mut self, mementos: Arc<dyn MementoLookup>) -> Self {
        self.mementos = mementos;
        self
    }

    pub fn preferences(mut self, preferences: Arc<dyn PreferenceSource>) -> Self {
        self.preferences = preferences;
        self
    }

    /// Share a breaker registry across coordinators.
    pub fn breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn traffic(mut self, traffic: Arc<TrafficMonitor>) -> Self {
        self.traffic = Some(traffic);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> ArchiveCoordinator {
        let sink = self.sink;
        let breakers = self
            .breakers
            .unwrap_or_else(|| Arc::new(BreakerRegistry::new(self.config.breaker.clone(), sink.clone())));
        let traffic = self
            .traffic
            .unwrap_or_else(|| Arc::new(TrafficMonitor::new(self.config.traffic.clone(), sink.clone())));

        ArchiveCoordinator {
            backends: self.backends,
            mementos: self.mementos,
            preferences: self.preferences,
            breakers,
            traffic,
            sink,
            max_concurrency: self.config.queue.max_concurrency,
        }
    }
}
