//! TimeMap lookups.
//!
//! # Responsibilities
//! - Query every configured aggregator's TimeMap for a URL
//! - Fall back to the known archives' own TimeMaps when no aggregator has captures
//! - Parse JSON or link-format TimeMaps into `MementoRecord`s
//! - Read stored records from item annotations
//!
//! # Design Decisions
//! - Captures from every provider in a pass are merged, newest first, so the
//!   caller picks the most recent capture across providers
//! - A provider error only surfaces when no provider in either pass answered
//!
//! # Data Flow
//! ```text
//! aggregators (concurrent) ──► any captures? ──yes──► merge
//!                                   │ no
//!                                   ▼
//!                    archives (concurrent) ──► merge
//! ```

use std::time::Duration;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;

use crate::config::{MementoConfig, TimeMapProvider};
use crate::dispatch::item::WorkItem;
use crate::memento::{
    detect_backend, parse_stored_mementos, MementoError, MementoLookup, MementoRecord, RemoteLookup,
};

#[derive(Debug, Deserialize)]
struct TimeMapDocument {
    #[serde(default)]
    mementos: Option<TimeMapMementos>,
}

#[derive(Debug, Deserialize)]
struct TimeMapMementos {
    #[serde(default)]
    list: Vec<TimeMapEntry>,
}

#[derive(Debug, Deserialize)]
struct TimeMapEntry {
    uri: String,
    datetime: String,
}

/// Memento lookup backed by HTTP TimeMaps.
#[derive(Debug, Clone)]
pub struct TimeMapLookup {
    aggregators: Vec<TimeMapProvider>,
    archives: Vec<TimeMapProvider>,
    client: Client,
}

/// Outcome of querying one group of providers.
#[derive(Default)]
struct PassResult {
    records: Vec<MementoRecord>,
    answered: bool,
    last_error: Option<MementoError>,
}

impl TimeMapLookup {
    pub fn new(config: &MementoConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            aggregators: config.aggregators.clone(),
            archives: config.archives.clone(),
            client,
        })
    }

    /// Query every provider concurrently and merge what they return.
    async fn query_all(&self, providers: &[TimeMapProvider], url: &str) -> PassResult {
        let responses = join_all(providers.iter().map(|provider| self.fetch(provider, url))).await;

        let mut pass = PassResult::default();
        for (provider, response) in providers.iter().zip(responses) {
            match response {
                Ok(records) => {
                    if !records.is_empty() {
                        tracing::debug!(provider = %provider.name, url = %url, count = records.len(), "Found existing mementos");
                    }
                    pass.answered = true;
                    pass.records.extend(records);
                }
                Err(e) => {
                    tracing::debug!(provider = %provider.name, url = %url, error = %e, "TimeMap lookup failed");
                    pass.last_error = Some(e);
                }
            }
        }
        pass
    }

    async fn fetch(&self, provider: &TimeMapProvider, url: &str) -> Result<Vec<MementoRecord>, MementoError> {
        let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
        let timemap_url = format!("{}{}", provider.timemap_url, encoded);

        let request_error = |message: String| MementoError::Request {
            provider: provider.name.clone(),
            message,
        };

        let response = self
            .client
            .get(&timemap_url)
            .header(reqwest::header::ACCEPT, "application/json, application/link-format;q=0.9")
            .send()
            .await
            .map_err(|e| request_error(e.to_string()))?;

        // Providers answer 404 when they hold no captures.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(request_error(format!("HTTP {}", response.status().as_u16())));
        }

        let body = response.text().await.map_err(|e| request_error(e.to_string()))?;
        parse_timemap(&provider.name, &body)
    }
}

/// Parse a TimeMap body, JSON first and link format otherwise.
/// Entries with unparseable datetimes are skipped.
pub fn parse_timemap(provider: &str, body: &str) -> Result<Vec<MementoRecord>, MementoError> {
    let entries = match serde_json::from_str::<TimeMapDocument>(body) {
        Ok(document) => document.mementos.map(|m| m.list).unwrap_or_default(),
        Err(json_error) => parse_link_format(body).ok_or_else(|| MementoError::InvalidTimeMap {
            provider: provider.to_string(),
            message: json_error.to_string(),
        })?,
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let datetime = parse_datetime(&entry.datetime)?;
            let source_backend = detect_backend(&entry.uri)
                .map(str::to_string)
                .unwrap_or_else(|| provider.to_string());
            Some(MementoRecord {
                url: entry.uri,
                datetime,
                source_backend,
            })
        })
        .collect())
}

/// Memento entries of an `application/link-format` TimeMap:
///
/// ```text
/// <https://web.archive.org/web/20240601083000/https://example.org/>; rel="memento"; datetime="Sat, 01 Jun 2024 08:30:00 GMT",
/// ```
///
/// `None` when the body holds no links with a `rel` parameter.
fn parse_link_format(body: &str) -> Option<Vec<TimeMapEntry>> {
    let mut saw_link = false;
    let mut entries = Vec::new();

    for chunk in body.split('<').skip(1) {
        let Some((uri, params)) = chunk.split_once('>') else {
            continue;
        };

        let mut rel = None;
        let mut datetime = None;
        for param in params.split(';') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_end_matches(',').trim().trim_matches('"');
            match key.trim().to_ascii_lowercase().as_str() {
                "rel" => rel = Some(value),
                "datetime" => datetime = Some(value),
                _ => {}
            }
        }

        let Some(rel) = rel else {
            continue;
        };
        saw_link = true;
        // "first memento", "last memento" and "memento" all name captures.
        if !rel.split_whitespace().any(|r| r == "memento") {
            continue;
        }
        if let Some(datetime) = datetime {
            entries.push(TimeMapEntry {
                uri: uri.trim().to_string(),
                datetime: datetime.to_string(),
            });
        }
    }

    saw_link.then_some(entries)
}

/// Newest first, one record per archive URL.
fn merge_newest_first(mut records: Vec<MementoRecord>) -> Vec<MementoRecord> {
    records.sort_by(|a, b| b.datetime.cmp(&a.datetime));
    let mut seen = HashSet::new();
    records.retain(|record| seen.insert(record.url.clone()));
    records
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl MementoLookup for TimeMapLookup {
    async fn find_stored(&self, item: &WorkItem) -> Result<Vec<MementoRecord>, MementoError> {
        Ok(item
            .extra
            .as_deref()
            .map(|extra| parse_stored_mementos(extra, Utc::now()))
            .unwrap_or_default())
    }

    async fn lookup_remote(&self, url: &str) -> Result<RemoteLookup, MementoError> {
        let mut pass = self.query_all(&self.aggregators, url).await;

        if pass.records.is_empty() && !self.archives.is_empty() {
            tracing::debug!(url = %url, archives = self.archives.len(), "No aggregator captures, querying archives");
            let archives = self.query_all(&self.archives, url).await;
            pass.records = archives.records;
            pass.answered |= archives.answered;
            pass.last_error = archives.last_error.or(pass.last_error);
        }

        if !pass.records.is_empty() {
            return Ok(RemoteLookup {
                found: true,
                records: merge_newest_first(pass.records),
            });
        }

        match pass.last_error {
            Some(e) if !pass.answered => Err(e),
            _ => Ok(RemoteLookup::default()),
        }
    }
}
