//! End-to-end dispatch scenarios against scripted backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use archive_dispatch::backend::{FailureKind, StaticRegistry};
use archive_dispatch::config::{ArchivePreferences, MementoConfig, PreferenceSource};
use archive_dispatch::dispatch::{
    ArchiveCoordinator, BatchRequest, Disposition, DispatchError, MementoSource, NoCandidatesReason, WorkItem,
};
use archive_dispatch::memento::{MementoError, MementoLookup, MementoRecord, RemoteLookup, TimeMapLookup};
use archive_dispatch::observability::{ChannelSink, DispatchEvent};

mod common;
use common::{items, ScriptedBackend, Step};

fn preferences(order: &[&str]) -> ArchivePreferences {
    ArchivePreferences {
        fallback_order: order.iter().map(|s| s.to_string()).collect(),
        default_backend: order.first().map(|s| s.to_string()).unwrap_or_default(),
        check_before_archive: false,
        ..ArchivePreferences::default()
    }
}

fn coordinator(registry: StaticRegistry, prefs: ArchivePreferences) -> ArchiveCoordinator {
    ArchiveCoordinator::builder(Arc::new(registry))
        .preferences(Arc::new(prefs) as Arc<dyn PreferenceSource>)
        .build()
}

async fn jam(coordinator: &ArchiveCoordinator, backend_id: &str) {
    let _ = coordinator
        .traffic()
        .observe(backend_id, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, ()>(())
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_jammed_backends_are_skipped() {
    let a = ScriptedBackend::succeeding("a").shared();
    let b = ScriptedBackend::succeeding("b").shared();
    let c = ScriptedBackend::succeeding("c").shared();
    let registry = StaticRegistry::new()
        .with_backend(a.clone())
        .with_backend(b.clone())
        .with_backend(c.clone());
    let coordinator = coordinator(registry, preferences(&["a", "b", "c"]));

    let context = coordinator.prepare_batch(None).await;
    jam(&coordinator, "a").await;
    jam(&coordinator, "b").await;

    let outcome = coordinator
        .archive_item(&context, WorkItem::new("k", "https://example.org"))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.backend_id.as_deref(), Some("c"));
    assert_eq!(outcome.archived_url, Some(c.capture_url()));
    assert_eq!((a.calls(), b.calls(), c.calls()), (0, 0, 1));
}

#[tokio::test(start_paused = true)]
async fn test_backends_jammed_mid_batch_affect_later_items() {
    let slow = Duration::from_secs(25);
    let a = ScriptedBackend::succeeding("a").with_delay(slow).shared();
    let b = ScriptedBackend::succeeding("b").with_delay(slow).shared();
    let c = ScriptedBackend::succeeding("c").shared();
    let registry = StaticRegistry::new()
        .with_backend(a.clone())
        .with_backend(b.clone())
        .with_backend(c.clone());
    let coordinator = coordinator(registry, preferences(&["a", "b", "c"]));

    let outcomes = coordinator
        .archive_items(&items(3), BatchRequest::default().sequential())
        .await;

    let used: Vec<_> = outcomes.iter().map(|o| o.backend_id.as_deref()).collect();
    assert_eq!(used, vec![Some("a"), Some("b"), Some("c")]);
    assert_eq!(coordinator.traffic().jammed_backends(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_open_breaker_is_reported_in_aggregate_error() {
    let a = ScriptedBackend::succeeding("a").shared();
    let b = ScriptedBackend::failing("b", FailureKind::ServerError, "b server error (HTTP 502)").shared();
    let registry = StaticRegistry::new().with_backend(a.clone()).with_backend(b.clone());
    let coordinator = coordinator(registry, preferences(&["a", "b"]));
    coordinator.breakers().breaker("a").trip();

    let outcomes = coordinator
        .archive_items(&[WorkItem::new("k", "https://example.org")], BatchRequest::default())
        .await;

    let outcome = &outcomes[0];
    assert!(!outcome.success);
    let message = outcome.error_message().unwrap();
    assert!(message.contains("a: circuit breaker open"), "{message}");
    assert!(message.contains("b: b server error (HTTP 502)"), "{message}");
    assert_eq!(a.calls(), 0);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn test_all_breakers_open_is_lockout() {
    let registry = StaticRegistry::new()
        .with_backend(ScriptedBackend::succeeding("a").shared())
        .with_backend(ScriptedBackend::succeeding("b").shared());
    let coordinator = coordinator(registry, preferences(&["a", "b"]));
    coordinator.breakers().breaker("a").trip();
    coordinator.breakers().breaker("b").trip();

    let outcomes = coordinator
        .archive_items(&[WorkItem::new("k", "https://example.org")], BatchRequest::default())
        .await;
    assert_eq!(
        outcomes[0].error,
        Some(DispatchError::NoCandidates {
            reason: NoCandidatesReason::BreakerLockout
        })
    );
}

#[tokio::test]
async fn test_no_available_backends() {
    let registry = StaticRegistry::new().with_backend(ScriptedBackend::succeeding("a").unavailable().shared());
    let coordinator = coordinator(registry, preferences(&["a"]));

    let outcomes = coordinator.archive_items(&items(2), BatchRequest::default()).await;
    for outcome in outcomes {
        assert_eq!(
            outcome.error,
            Some(DispatchError::NoCandidates {
                reason: NoCandidatesReason::Unavailable
            })
        );
    }
}

fn wayback_capture(hours_ago: i64) -> String {
    let captured = Utc::now() - chrono::Duration::hours(hours_ago);
    format!(
        "https://web.archive.org/web/{}/https://example.org",
        captured.format("%Y%m%d%H%M%S")
    )
}

fn stored_only_lookup() -> Arc<dyn MementoLookup> {
    let config = MementoConfig {
        aggregators: Vec::new(),
        archives: Vec::new(),
        ..MementoConfig::default()
    };
    Arc::new(TimeMapLookup::new(&config).unwrap())
}

fn precheck(auto_skip: bool) -> ArchivePreferences {
    ArchivePreferences {
        check_before_archive: true,
        skip_existing_mementos: auto_skip,
        archive_age_threshold_hours: 24,
        ..preferences(&["a"])
    }
}

#[tokio::test]
async fn test_recent_stored_memento_is_reused() {
    let a = ScriptedBackend::succeeding("a").shared();
    let capture = wayback_capture(2);
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(a.clone())))
        .preferences(Arc::new(precheck(true)))
        .mementos(stored_only_lookup())
        .build();

    let item = WorkItem::new("k", "https://example.org").with_extra(format!("Archived: {capture}"));
    let outcomes = coordinator.archive_items(&[item], BatchRequest::default()).await;

    let outcome = &outcomes[0];
    assert!(outcome.success);
    assert_eq!(outcome.archived_url.as_deref(), Some(capture.as_str()));
    assert_eq!(outcome.disposition(), Disposition::Reused);
    assert_eq!(outcome.existing_archive.as_ref().map(|e| e.source), Some(MementoSource::Stored));
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn test_huge_age_threshold_treats_every_memento_as_fresh() {
    let a = ScriptedBackend::succeeding("a").shared();
    let capture = wayback_capture(24 * 365 * 5);
    let prefs = ArchivePreferences {
        archive_age_threshold_hours: 9_000_000_000_000_000_000,
        ..precheck(true)
    };
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(a.clone())))
        .preferences(Arc::new(prefs))
        .mementos(stored_only_lookup())
        .build();

    let item = WorkItem::new("k", "https://example.org").with_extra(format!("Archived: {capture}"));
    let outcomes = coordinator.archive_items(&[item], BatchRequest::default()).await;

    assert_eq!(outcomes[0].disposition(), Disposition::Reused);
    assert_eq!(outcomes[0].archived_url.as_deref(), Some(capture.as_str()));
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn test_recent_memento_without_auto_skip_is_pending() {
    let a = ScriptedBackend::succeeding("a").shared();
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(a.clone())))
        .preferences(Arc::new(precheck(false)))
        .mementos(stored_only_lookup())
        .build();

    let item = WorkItem::new("k", "https://example.org").with_extra(format!("Archived: {}", wayback_capture(3)));
    let outcomes = coordinator.archive_items(&[item], BatchRequest::default()).await;

    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].disposition(), Disposition::Pending);
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn test_stale_memento_is_archived_again() {
    let a = ScriptedBackend::succeeding("a").shared();
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(a.clone())))
        .preferences(Arc::new(precheck(true)))
        .mementos(stored_only_lookup())
        .build();

    let item = WorkItem::new("k", "https://example.org").with_extra(format!("Archived: {}", wayback_capture(48)));
    let outcomes = coordinator.archive_items(&[item], BatchRequest::default()).await;

    assert_eq!(outcomes[0].disposition(), Disposition::Created);
    assert_eq!(a.calls(), 1);
}

struct BrokenLookup;

#[async_trait]
impl MementoLookup for BrokenLookup {
    async fn find_stored(&self, _item: &WorkItem) -> Result<Vec<MementoRecord>, MementoError> {
        Err(MementoError::InvalidTimeMap {
            provider: "stored".into(),
            message: "unreadable".into(),
        })
    }

    async fn lookup_remote(&self, _url: &str) -> Result<RemoteLookup, MementoError> {
        Err(MementoError::Request {
            provider: "MemGator".into(),
            message: "connection refused".into(),
        })
    }
}

#[tokio::test]
async fn test_memento_lookup_errors_do_not_block_archiving() {
    let a = ScriptedBackend::succeeding("a").shared();
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(a.clone())))
        .preferences(Arc::new(precheck(true)))
        .mementos(Arc::new(BrokenLookup))
        .build();

    let outcomes = coordinator
        .archive_items(&[WorkItem::new("k", "https://example.org")], BatchRequest::default())
        .await;
    assert!(outcomes[0].success);
    assert_eq!(a.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_outcomes_ordered_and_concurrency_bounded() {
    let a = ScriptedBackend::succeeding("a")
        .with_delay(Duration::from_millis(300))
        .shared();
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(a.clone())))
        .preferences(Arc::new(preferences(&["a"])))
        .max_concurrency(3)
        .build();

    let batch = items(10);
    let outcomes = coordinator.archive_items(&batch, BatchRequest::default()).await;

    assert_eq!(outcomes.len(), batch.len());
    for (outcome, item) in outcomes.iter().zip(&batch) {
        assert_eq!(&outcome.item, item);
        assert!(outcome.success);
    }
    assert_eq!(a.peak_concurrency(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_mode_bypasses_the_queue() {
    let a = ScriptedBackend::succeeding("a")
        .then([Step::Fail(FailureKind::NotFound, "a could not find the resource".into())])
        .with_delay(Duration::from_millis(50))
        .shared();
    let (sink, mut events) = ChannelSink::new();
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(a.clone())))
        .preferences(Arc::new(preferences(&["a"])))
        .sink(Arc::new(sink))
        .build();

    let batch = items(4);
    let outcomes = coordinator
        .archive_items(&batch, BatchRequest::default().sequential())
        .await;

    assert_eq!(outcomes.len(), 4);
    for (outcome, item) in outcomes.iter().zip(&batch) {
        assert_eq!(&outcome.item, item);
    }
    assert!(!outcomes[0].success);
    assert!(outcomes[1..].iter().all(|o| o.success));
    assert_eq!(a.peak_concurrency(), 1);

    let mut queue_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DispatchEvent::Progress(_) | DispatchEvent::BatchFinished(_)) {
            queue_events += 1;
        }
    }
    assert_eq!(queue_events, 0);

    coordinator.archive_items(&items(2), BatchRequest::default()).await;
    let mut progress = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DispatchEvent::Progress(_)) {
            progress += 1;
        }
    }
    assert_eq!(progress, 2);
}

#[tokio::test]
async fn test_panicking_backend_fails_only_its_item() {
    let a = ScriptedBackend::succeeding("a")
        .then([
            Step::Archive("https://a.archive.example/first".into()),
            Step::Panic("adapter bug".into()),
        ])
        .shared();
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(a.clone())))
        .preferences(Arc::new(preferences(&["a"])))
        .build();

    let outcomes = coordinator
        .archive_items(&items(3), BatchRequest::with_backend("a").sequential())
        .await;

    assert!(outcomes[0].success);
    assert!(matches!(outcomes[1].error, Some(DispatchError::TaskFailed(ref m)) if m.contains("adapter bug")));
    assert!(outcomes[2].success);
}

#[tokio::test]
async fn test_repeated_batches_are_idempotent() {
    let registry = StaticRegistry::new()
        .with_backend(ScriptedBackend::failing("a", FailureKind::NotFound, "a could not find the resource").shared())
        .with_backend(ScriptedBackend::succeeding("b").shared());
    let coordinator = coordinator(registry, preferences(&["a", "b"]));

    let mut batch = items(4);
    batch.push(WorkItem::without_url("no-url"));

    let first = coordinator.archive_items(&batch, BatchRequest::default()).await;
    let second = coordinator.archive_items(&batch, BatchRequest::default()).await;
    assert_eq!(first, second);
    assert_eq!(first[4].error, Some(DispatchError::NoTarget));
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_keeps_traffic_state() {
    let registry = StaticRegistry::new().with_backend(ScriptedBackend::succeeding("a").shared());
    let coordinator = coordinator(registry, preferences(&["a"]));
    jam(&coordinator, "a").await;

    let outcomes = coordinator.archive_items(&[], BatchRequest::default()).await;
    assert!(outcomes.is_empty());
    assert!(coordinator.traffic().is_jammed("a"));

    coordinator.archive_items(&items(1), BatchRequest::default()).await;
    assert!(!coordinator.traffic().is_jammed("a"));
}
