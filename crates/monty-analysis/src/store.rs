//! The concurrent URI to document entry map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use url::Url;

use crate::change::PendingChange;
use crate::diagnostics::ReportedDiagnostics;
use crate::document::Entry;
use crate::error::Error;
use crate::error::Result;

/// The concurrent map of known document entries.
///
/// Entries are keyed by canonical URI: the fragment is ignored, so every part
/// of a multi-part document shares one entry. Pending changes are keyed by
/// the full URI including the fragment, since each part orders its changes
/// independently.
#[derive(Debug, Default)]
pub struct DocumentStore {
    /// The entries, keyed by canonical URI.
    entries: RwLock<HashMap<Url, Arc<Entry>>>,
    /// Deferred changes, keyed by full URI, each list under its own lock.
    pending_changes: Mutex<HashMap<String, Arc<Mutex<Vec<PendingChange>>>>>,
    /// The last published diagnostics for each entry.
    reported: ReportedDiagnostics,
}

impl DocumentStore {
    /// Constructs a new, empty store.
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets the canonical (fragment free) form of a URI.
    pub fn canonical(uri: &Url) -> Url {
        let mut uri = uri.clone();
        uri.set_fragment(None);
        uri
    }

    /// Gets the document part selected by a URI fragment.
    ///
    /// Returns 0 when the fragment is absent, malformed, or not an integer.
    pub fn get_part(uri: &Url) -> u32 {
        uri.fragment()
            .and_then(|fragment| fragment.parse().ok())
            .unwrap_or(0)
    }

    /// Adds an entry to the store.
    ///
    /// The insertion is atomic: when another entry was inserted concurrently
    /// for the same URI, the pre-existing entry is returned instead.
    pub fn get_or_add(&self, entry: Arc<Entry>) -> Arc<Entry> {
        let mut entries = self.entries.write();
        entries.entry(entry.uri().clone()).or_insert(entry).clone()
    }

    /// Gets the entry for a URI.
    ///
    /// Returns [`Error::UnknownDocument`] when the URI is not in the store.
    pub fn get(&self, uri: &Url) -> Result<Arc<Entry>> {
        self.try_get(uri)
            .ok_or_else(|| Error::UnknownDocument(Self::canonical(uri)))
    }

    /// Gets the entry for a URI, or `None` when the URI is not in the store.
    pub fn try_get(&self, uri: &Url) -> Option<Arc<Entry>> {
        self.entries.read().get(&Self::canonical(uri)).cloned()
    }

    /// Removes the entry for a URI.
    ///
    /// Also removes the reported diagnostics record and any pending changes
    /// for the entry's parts.
    pub fn remove(&self, uri: &Url) -> Option<Arc<Entry>> {
        let canonical = Self::canonical(uri);
        let removed = self.entries.write().remove(&canonical);
        if removed.is_some() {
            self.reported.remove(&canonical);

            let fragment_prefix = format!("{canonical}#");
            self.pending_changes
                .lock()
                .retain(|key, _| key != canonical.as_str() && !key.starts_with(&fragment_prefix));
        }

        removed
    }

    /// Gets a snapshot of every entry in the store.
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        self.entries.read().values().cloned().collect()
    }

    /// Gets the number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Defers a change until its predecessor version arrives.
    pub(crate) fn defer_change(&self, uri: &Url, change: PendingChange) {
        let list = self
            .pending_changes
            .lock()
            .entry(uri.to_string())
            .or_default()
            .clone();
        list.lock().push(change);
    }

    /// Takes the next applicable pending change for a URI.
    ///
    /// Discards pending changes below `min_version` and returns the pending
    /// change with the smallest declared version, if any remain.
    pub(crate) fn take_next_pending(&self, uri: &Url, min_version: i32) -> Option<PendingChange> {
        let list = self.pending_changes.lock().get(uri.as_str()).cloned()?;
        let mut list = list.lock();
        list.retain(|change| change.declared >= min_version);
        if list.is_empty() {
            return None;
        }

        list.sort_by_key(|change| change.declared);
        Some(list.remove(0))
    }

    /// Gets the reported diagnostics records.
    pub(crate) fn reported(&self) -> &ReportedDiagnostics {
        &self.reported
    }
}
