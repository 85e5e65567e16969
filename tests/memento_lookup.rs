//! Remote TimeMap lookups against local mock providers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use archive_dispatch::backend::StaticRegistry;
use archive_dispatch::config::{ArchivePreferences, MementoConfig, TimeMapProvider};
use archive_dispatch::dispatch::{ArchiveCoordinator, BatchRequest, Disposition, MementoSource, WorkItem};
use archive_dispatch::memento::{most_recent_within, MementoError, MementoLookup, TimeMapLookup};

mod common;
use common::{start_programmable_backend, ScriptedBackend};

fn capture_url(at: DateTime<Utc>) -> String {
    format!("https://web.archive.org/web/{}/https://example.org/", at.format("%Y%m%d%H%M%S"))
}

fn json_timemap(captures: &[DateTime<Utc>]) -> String {
    let list: Vec<_> = captures
        .iter()
        .map(|at| serde_json::json!({ "uri": capture_url(*at), "datetime": at.to_rfc3339() }))
        .collect();
    serde_json::json!({ "original_uri": "https://example.org/", "mementos": { "list": list } }).to_string()
}

fn link_timemap(captures: &[DateTime<Utc>]) -> String {
    let mut body = String::from("<https://example.org/>; rel=\"original\"");
    for at in captures {
        body.push_str(&format!(
            ",\n<{}>; rel=\"memento\"; datetime=\"{}\"",
            capture_url(*at),
            at.to_rfc2822()
        ));
    }
    body
}

async fn timemap_server(status: u16, body: String) -> SocketAddr {
    start_programmable_backend(move |_head| {
        let body = body.clone();
        async move { (status, Vec::new(), body) }
    })
    .await
}

fn provider(name: &str, addr: SocketAddr) -> TimeMapProvider {
    TimeMapProvider {
        name: name.to_string(),
        timemap_url: format!("http://{addr}/timemap/"),
    }
}

fn lookup(aggregators: Vec<TimeMapProvider>, archives: Vec<TimeMapProvider>) -> TimeMapLookup {
    let config = MementoConfig {
        timeout_secs: 5,
        aggregators,
        archives,
        ..MementoConfig::default()
    };
    TimeMapLookup::new(&config).unwrap()
}

#[tokio::test]
async fn test_newest_capture_wins_across_aggregators() {
    let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let fresh = Utc::now() - chrono::Duration::hours(1);
    let first = timemap_server(200, json_timemap(&[old])).await;
    let second = timemap_server(200, link_timemap(&[fresh])).await;

    let lookup = lookup(vec![provider("first", first), provider("second", second)], Vec::new());
    let result = lookup.lookup_remote("https://example.org/").await.unwrap();

    assert!(result.found);
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.records[0].url, capture_url(fresh));

    let newest = most_recent_within(&result.records, chrono::Duration::hours(24), Utc::now()).unwrap();
    assert_eq!(newest.url, capture_url(fresh));
    assert_eq!(newest.source_backend, "internetarchive");
}

#[tokio::test]
async fn test_fresh_remote_capture_is_reused_by_coordinator() {
    let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let fresh = Utc::now() - chrono::Duration::hours(1);
    let first = timemap_server(200, json_timemap(&[old])).await;
    let second = timemap_server(200, json_timemap(&[fresh])).await;

    let backend = ScriptedBackend::succeeding("a").shared();
    let prefs = ArchivePreferences {
        fallback_order: vec!["a".to_string()],
        default_backend: "a".to_string(),
        check_before_archive: true,
        skip_existing_mementos: true,
        ..ArchivePreferences::default()
    };
    let coordinator = ArchiveCoordinator::builder(Arc::new(StaticRegistry::new().with_backend(backend.clone())))
        .preferences(Arc::new(prefs))
        .mementos(Arc::new(lookup(
            vec![provider("first", first), provider("second", second)],
            Vec::new(),
        )))
        .build();

    let outcomes = coordinator
        .archive_items(&[WorkItem::new("k", "https://example.org/")], BatchRequest::default())
        .await;

    let outcome = &outcomes[0];
    assert_eq!(outcome.disposition(), Disposition::Reused);
    assert_eq!(outcome.archived_url.as_deref(), Some(capture_url(fresh).as_str()));
    assert_eq!(outcome.existing_archive.as_ref().map(|e| e.source), Some(MementoSource::Remote));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_archives_merged_when_aggregators_have_nothing() {
    let older = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
    let newer = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let aggregator = timemap_server(404, String::new()).await;
    let ia = timemap_server(200, json_timemap(&[older])).await;
    let uk = timemap_server(200, link_timemap(&[newer, older])).await;

    let lookup = lookup(
        vec![provider("aggregator", aggregator)],
        vec![provider("Internet Archive", ia), provider("UK Web Archive", uk)],
    );
    let result = lookup.lookup_remote("https://example.org/").await.unwrap();

    assert!(result.found);
    let urls: Vec<_> = result.records.iter().map(|r| r.url.clone()).collect();
    assert_eq!(urls, [capture_url(newer), capture_url(older)]);
}

#[tokio::test]
async fn test_archives_not_queried_when_aggregator_answers() {
    let aggregator = timemap_server(200, json_timemap(&[Utc::now()])).await;
    let hits = Arc::new(AtomicU32::new(0));
    let archive = {
        let hits = hits.clone();
        start_programmable_backend(move |_head| {
            hits.fetch_add(1, Ordering::SeqCst);
            async move { (200, Vec::new(), json_timemap(&[])) }
        })
        .await
    };

    let lookup = lookup(vec![provider("aggregator", aggregator)], vec![provider("archive", archive)]);
    let result = lookup.lookup_remote("https://example.org/").await.unwrap();

    assert!(result.found);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_target_url_is_appended_encoded() {
    let seen = Arc::new(std::sync::Mutex::new(String::new()));
    let addr = {
        let seen = seen.clone();
        start_programmable_backend(move |head| {
            *seen.lock().unwrap() = head.lines().next().unwrap_or_default().to_string();
            async move { (404, Vec::new(), String::new()) }
        })
        .await
    };

    let lookup = lookup(vec![provider("aggregator", addr)], Vec::new());
    let result = lookup.lookup_remote("https://example.org/a?b=c").await.unwrap();

    assert!(!result.found);
    assert_eq!(
        *seen.lock().unwrap(),
        "GET /timemap/https%3A%2F%2Fexample.org%2Fa%3Fb%3Dc HTTP/1.1"
    );
}

#[tokio::test]
async fn test_error_only_when_no_provider_answers() {
    let broken = timemap_server(500, String::new()).await;
    let empty = timemap_server(404, String::new()).await;

    let failing = lookup(vec![provider("broken", broken)], vec![provider("also broken", broken)]);
    assert!(matches!(
        failing.lookup_remote("https://example.org/").await,
        Err(MementoError::Request { .. })
    ));

    let partial = lookup(vec![provider("broken", broken)], vec![provider("empty", empty)]);
    let result = partial.lookup_remote("https://example.org/").await.unwrap();
    assert!(!result.found);
}
