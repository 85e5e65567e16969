//! Work items submitted for archiving.

use serde::{Deserialize, Serialize};

/// One resource to archive. Immutable for the duration of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque reference to the source record.
    pub key: String,
    /// Resolved target URL, if the record has one.
    #[serde(default)]
    pub url: Option<String>,
    /// Free-text annotations; prior archive links may be recorded here.
    #[serde(default)]
    pub extra: Option<String>,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: Some(url.into()),
            extra: None,
        }
    }

    /// An item with no target URL.
    pub fn without_url(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: None,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// The target URL, trimmed. `None` when missing or blank.
    pub fn target_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
