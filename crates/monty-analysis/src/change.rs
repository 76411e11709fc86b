//! Ordering, gap buffering, and application of incremental edits.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::edit::SourceEdit;
use crate::error::Error;
use crate::error::Result;
use crate::store::DocumentStore;

/// An incremental change notification for one document part.
#[derive(Debug, Clone, Default)]
pub struct DocumentChange {
    /// The document version this change produces.
    ///
    /// When absent, the change is applied against the current version and
    /// advances it by the number of edits.
    pub version: Option<i32>,
    /// The edits to apply, in order.
    ///
    /// A `None` edit list is a no-op.
    pub edits: Option<Vec<SourceEdit>>,
}

/// A change deferred until its predecessor version arrives.
#[derive(Debug)]
pub(crate) struct PendingChange {
    /// The version the change declared it produces.
    pub declared: i32,
    /// The deferred change.
    pub change: DocumentChange,
}

/// Applies incremental changes to document parts in declared version order.
///
/// Clients may deliver change notifications out of order. A change whose
/// predecessor version has not yet been applied is parked in the store's
/// pending list (keyed by the full URI, including the fragment) and drained
/// when the predecessor arrives.
#[derive(Debug)]
pub struct ChangeReconciler {
    /// The document store holding entries and pending changes.
    store: Arc<DocumentStore>,
}

impl ChangeReconciler {
    /// Constructs a new reconciler over the given store.
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Applies a change notification to the part selected by the URI
    /// fragment.
    ///
    /// Returns `true` when the document was modified and `false` when the
    /// change was a no-op or was deferred awaiting its predecessor.
    ///
    /// Returns [`Error::UnknownDocument`](crate::Error::UnknownDocument) when
    /// the URI is not in the store or the part has no open buffer.
    pub fn apply(&self, uri: &Url, change: DocumentChange) -> Result<bool> {
        let entry = self.store.get(uri)?;
        let part = DocumentStore::get_part(uri);
        if !entry.document().is_open(part) {
            return Err(Error::UnknownDocument(DocumentStore::canonical(uri)));
        }

        let mut change = change;
        let mut applied = false;
        loop {
            let edits = match change.edits.take() {
                Some(edits) => edits,
                None => return Ok(applied),
            };

            let current = entry.document().version(part).max(0);
            let (from, to) = match change.version {
                // The client declares the version it produces; it expected to
                // apply against the one before it
                Some(to) => ((to - 1).max(0), to),
                None => (current, current + edits.len() as i32),
            };

            let has_full_edit = edits.iter().any(SourceEdit::is_full);
            if from > current && !has_full_edit {
                debug!(
                    "deferring change for `{uri}`: expected version {from} but the current \
                     version is {current}"
                );
                self.store.defer_change(
                    uri,
                    PendingChange {
                        declared: to,
                        change: DocumentChange {
                            version: Some(to),
                            edits: Some(edits),
                        },
                    },
                );
                return Ok(applied);
            }

            entry.document().update(part, from, to, &edits)?;
            applied = true;

            match self.store.take_next_pending(uri, to) {
                Some(pending) => change = pending.change,
                None => return Ok(true),
            }
        }
    }
}
