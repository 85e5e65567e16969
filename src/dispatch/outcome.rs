//! Per-item results.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::dispatch::error::DispatchError;
use crate::dispatch::item::WorkItem;
use crate::memento::MementoRecord;

/// Where an existing archive was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MementoSource {
    Stored,
    Remote,
}

/// A recent archive found before dispatching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingArchive {
    pub record: MementoRecord,
    pub source: MementoSource,
    /// Whether the existing archive was used in place of a new one.
    pub applied: bool,
}

/// What an outcome amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// A backend produced a new archive.
    Created,
    /// An existing archive was used instead.
    Reused,
    /// A recent archive exists; whether to reuse it is the caller's decision.
    Pending,
    Failed,
}

/// Exactly one per submitted item, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveOutcome {
    pub item: WorkItem,
    pub success: bool,
    pub archived_url: Option<String>,
    pub backend_id: Option<String>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<DispatchError>,
    pub status_message: Option<String>,
    pub existing_archive: Option<ExistingArchive>,
}

fn serialize_error<S: Serializer>(error: &Option<DispatchError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ArchiveOutcome {
    /// A backend archived the item.
    pub fn archived(item: WorkItem, backend_id: impl Into<String>, archived_url: impl Into<String>) -> Self {
        Self {
            item,
            success: true,
            archived_url: Some(archived_url.into()),
            backend_id: Some(backend_id.into()),
            error: None,
            status_message: None,
            existing_archive: None,
        }
    }

    /// A failed item. The backend id is taken from the error when it names one.
    pub fn failed(item: WorkItem, error: DispatchError) -> Self {
        Self {
            item,
            success: false,
            archived_url: None,
            backend_id: error.backend_id().map(str::to_string),
            error: Some(error),
            status_message: None,
            existing_archive: None,
        }
    }

    /// A recent existing archive, applied or left for the caller to decide on.
    pub fn existing(item: WorkItem, existing: ExistingArchive, now: DateTime<Utc>) -> Self {
        let age = format_age(existing.record.datetime, now);
        let status_message = if existing.applied {
            format!("Using existing archive from {} ({age})", existing.record.source_backend)
        } else {
            format!("Recent archive found ({age})")
        };
        Self {
            item,
            success: true,
            archived_url: Some(existing.record.url.clone()),
            backend_id: Some(existing.record.source_backend.clone()),
            error: None,
            status_message: Some(status_message),
            existing_archive: Some(existing),
        }
    }

    pub fn with_status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    /// Rendered error, if the item failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub fn disposition(&self) -> Disposition {
        match (&self.existing_archive, self.success) {
            (_, false) => Disposition::Failed,
            (Some(existing), true) if existing.applied => Disposition::Reused,
            (Some(_), true) => Disposition::Pending,
            (None, true) => Disposition::Created,
        }
    }
}

/// Human-readable age, e.g. `2 hours old`.
pub fn format_age(datetime: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let hours = now.signed_duration_since(datetime).num_hours();
    let days = hours / 24;
    if days > 0 {
        format!("{days} day{} old", if days > 1 { "s" } else { "" })
    } else if hours > 0 {
        format!("{hours} hour{} old", if hours > 1 { "s" } else { "" })
    } else {
        "less than 1 hour old".to_string()
    }
}
