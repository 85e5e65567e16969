//! Read-only preference snapshots for the dispatcher.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::ArchivePreferences;

/// Supplies the preferences a batch runs with.
///
/// The coordinator takes one snapshot per batch, so a reload that lands
/// mid-batch only affects the next batch.
pub trait PreferenceSource: Send + Sync {
    fn snapshot(&self) -> Arc<ArchivePreferences>;
}

impl PreferenceSource for ArchivePreferences {
    fn snapshot(&self) -> Arc<ArchivePreferences> {
        Arc::new(self.clone())
    }
}

/// Preferences that can be swapped atomically at runtime (e.g. by the config watcher).
#[derive(Debug)]
pub struct SharedPreferences {
    current: ArcSwap<ArchivePreferences>,
}

impl SharedPreferences {
    pub fn new(initial: ArchivePreferences) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Replace the current preferences.
    pub fn store(&self, preferences: ArchivePreferences) {
        self.current.store(Arc::new(preferences));
    }
}

impl Default for SharedPreferences {
    fn default() -> Self {
        Self::new(ArchivePreferences::default())
    }
}

impl PreferenceSource for SharedPreferences {
    fn snapshot(&self) -> Arc<ArchivePreferences> {
        self.current.load_full()
    }
}
