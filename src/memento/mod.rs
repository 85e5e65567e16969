//! Existing-archive (memento) discovery.
//!
//! # Responsibilities
//! - Find archive links already recorded on an item
//! - Query TimeMap aggregators for captures of a URL
//! - Pick the most recent capture younger than a threshold
//!
//! # Design Decisions
//! - Lookup failures are returned to the caller, which treats them as
//!   "nothing found"
//! - Stored records carry no capture time unless the archive URL encodes one

pub mod stored;
pub mod timemap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::dispatch::item::WorkItem;

pub use stored::parse_stored_mementos;
pub use timemap::TimeMapLookup;

/// A previously captured archive of a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MementoRecord {
    pub url: String,
    pub datetime: DateTime<Utc>,
    pub source_backend: String,
}

/// Result of a remote lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteLookup {
    pub found: bool,
    pub records: Vec<MementoRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MementoError {
    #[error("TimeMap request to {provider} failed: {message}")]
    Request { provider: String, message: String },

    #[error("Invalid TimeMap from {provider}: {message}")]
    InvalidTimeMap { provider: String, message: String },
}

/// Source of existing archives.
#[async_trait]
pub trait MementoLookup: Send + Sync {
    /// Records already attached to the item.
    async fn find_stored(&self, item: &WorkItem) -> Result<Vec<MementoRecord>, MementoError>;

    /// Captures known to remote aggregators.
    async fn lookup_remote(&self, url: &str) -> Result<RemoteLookup, MementoError>;
}

/// Finds nothing, ever.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMementoLookup;

#[async_trait]
impl MementoLookup for NoMementoLookup {
    async fn find_stored(&self, _item: &WorkItem) -> Result<Vec<MementoRecord>, MementoError> {
        Ok(Vec::new())
    }

    async fn lookup_remote(&self, _url: &str) -> Result<RemoteLookup, MementoError> {
        Ok(RemoteLookup::default())
    }
}

/// The newest record captured less than `max_age` before `now`.
pub fn most_recent_within<'a>(
    records: &'a [MementoRecord],
    max_age: Duration,
    now: DateTime<Utc>,
) -> Option<&'a MementoRecord> {
    records
        .iter()
        .filter(|r| now.signed_duration_since(r.datetime) < max_age)
        .max_by_key(|r| r.datetime)
}

/// Backend id inferred from an archive URL's host.
pub fn detect_backend(url: &str) -> Option<&'static str> {
    let host = url::Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
    let matches = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
    if matches("web.archive.org") || matches("archive.org") {
        Some("internetarchive")
    } else if matches("archive.today") || matches("archive.ph") || matches("archive.is") || matches("archive.li") {
        Some("archivetoday")
    } else if matches("perma.cc") {
        Some("permacc")
    } else if matches("arquivo.pt") {
        Some("arquivopt")
    } else if matches("webarchive.org.uk") {
        Some("ukwebarchive")
    } else {
        None
    }
}
