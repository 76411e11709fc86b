//! Diagnostic publication with monotonic version guarding.

use std::collections::HashMap;
use std::sync::Arc;

use lsp_types::Diagnostic;
use parking_lot::Mutex;
use url::Url;

use crate::event::AnalysisEvent;
use crate::event::EventBus;

/// The diagnostics most recently reported for one document part.
#[derive(Debug)]
struct ReportedPart {
    /// The part version the diagnostics were produced from.
    version: i32,
    /// The diagnostics that were reported.
    #[allow(dead_code)]
    diagnostics: Vec<Diagnostic>,
}

/// Tracks the last published diagnostics per document part.
///
/// Publishes for a given part never regress in version: once version V has
/// been recorded, a publish for any version below V is suppressed.
#[derive(Debug, Default)]
pub(crate) struct ReportedDiagnostics {
    /// Per-document records, guarded by a coarse lock on the inner map.
    inner: Mutex<HashMap<Url, Arc<Mutex<HashMap<u32, ReportedPart>>>>>,
}

impl ReportedDiagnostics {
    /// Gets the record for a document, creating it if needed.
    fn record(&self, uri: &Url) -> Arc<Mutex<HashMap<u32, ReportedPart>>> {
        self.inner.lock().entry(uri.clone()).or_default().clone()
    }

    /// Removes the record for a document.
    pub(crate) fn remove(&self, uri: &Url) {
        self.inner.lock().remove(uri);
    }

    /// Records a publish for the given part if it does not regress the
    /// version.
    ///
    /// Returns `true` when the publish should proceed. When `allow_equal` is
    /// set, a publish at the recorded version is allowed through; this is
    /// used by analysis completion, which republishes the version the parse
    /// already reported.
    pub(crate) fn gate(
        &self,
        uri: &Url,
        part: u32,
        version: i32,
        diagnostics: &[Diagnostic],
        allow_equal: bool,
    ) -> bool {
        let record = self.record(uri);
        let mut record = record.lock();
        Self::gate_locked(&mut record, part, version, diagnostics, allow_equal)
    }

    /// Gates a publish and, when it passes, delivers it while still holding
    /// the record lock.
    ///
    /// Holding the lock across delivery keeps the emitted event order
    /// consistent with the recorded versions when publishers race.
    pub(crate) fn publish_gated(
        &self,
        publisher: &DiagnosticPublisher,
        uri: &Url,
        part: u32,
        version: i32,
        diagnostics: Vec<Diagnostic>,
        allow_equal: bool,
    ) -> bool {
        let record = self.record(uri);
        let mut record = record.lock();
        if !Self::gate_locked(&mut record, part, version, &diagnostics, allow_equal) {
            return false;
        }

        publisher.publish(uri.clone(), part, version, diagnostics);
        true
    }

    /// The version comparison shared by the gating entry points.
    fn gate_locked(
        record: &mut HashMap<u32, ReportedPart>,
        part: u32,
        version: i32,
        diagnostics: &[Diagnostic],
        allow_equal: bool,
    ) -> bool {
        let publish = match record.get(&part) {
            None => true,
            Some(reported) if reported.version < version => true,
            Some(reported) => allow_equal && reported.version == version,
        };

        if publish {
            record.insert(
                part,
                ReportedPart {
                    version,
                    diagnostics: diagnostics.to_vec(),
                },
            );
        }

        publish
    }
}

/// Delivers already-gated diagnostics to subscribers.
///
/// The publisher is a pure sink: it performs no retry or coalescing.
#[derive(Debug, Clone)]
pub struct DiagnosticPublisher {
    /// The event bus diagnostics are delivered over.
    events: Arc<EventBus>,
}

impl DiagnosticPublisher {
    /// Constructs a new publisher delivering over the given event bus.
    pub(crate) fn new(events: Arc<EventBus>) -> Self {
        Self { events }
    }

    /// Delivers diagnostics for one document part.
    pub(crate) fn publish(&self, uri: Url, part: u32, version: i32, diagnostics: Vec<Diagnostic>) {
        self.events.emit(AnalysisEvent::PublishDiagnostics {
            uri,
            part,
            version,
            diagnostics,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Creates a test diagnostic with the given message.
    fn diagnostic(message: &str) -> Diagnostic {
        Diagnostic {
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn it_publishes_the_first_version() {
        let reported = ReportedDiagnostics::default();
        let uri: Url = "file:///a.py".parse().unwrap();
        assert!(reported.gate(&uri, 0, 1, &[diagnostic("d1")], false));
    }

    #[test]
    fn it_suppresses_stale_versions() {
        let reported = ReportedDiagnostics::default();
        let uri: Url = "file:///a.py".parse().unwrap();
        assert!(reported.gate(&uri, 0, 5, &[diagnostic("v5")], false));
        assert!(!reported.gate(&uri, 0, 4, &[diagnostic("v4")], false));
        assert!(!reported.gate(&uri, 0, 4, &[diagnostic("v4")], true));
        assert!(reported.gate(&uri, 0, 6, &[diagnostic("v6")], false));
    }

    #[test]
    fn it_allows_equal_versions_only_when_requested() {
        let reported = ReportedDiagnostics::default();
        let uri: Url = "file:///a.py".parse().unwrap();
        assert!(reported.gate(&uri, 0, 3, &[], false));
        assert!(!reported.gate(&uri, 0, 3, &[], false));
        assert!(reported.gate(&uri, 0, 3, &[], true));
    }

    #[test]
    fn it_tracks_parts_independently() {
        let reported = ReportedDiagnostics::default();
        let uri: Url = "file:///n.ipynb".parse().unwrap();
        assert!(reported.gate(&uri, 0, 5, &[], false));
        assert!(reported.gate(&uri, 1, 1, &[], false));
        assert!(!reported.gate(&uri, 1, 0, &[], false));
    }

    #[test]
    fn it_forgets_removed_documents() {
        let reported = ReportedDiagnostics::default();
        let uri: Url = "file:///a.py".parse().unwrap();
        assert!(reported.gate(&uri, 0, 5, &[], false));
        reported.remove(&uri);
        assert!(reported.gate(&uri, 0, 1, &[], false));
    }
}
