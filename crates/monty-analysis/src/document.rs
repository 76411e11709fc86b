//! Document buffers and the per-URI entries that own them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use anyhow::bail;
use line_index::LineIndex;
use parking_lot::RwLock;
use tracing::trace;
use url::Url;
use uuid::Uuid;

use crate::contracts::SyntaxTree;
use crate::edit::SourceEdit;

/// The version reported for parts that are backed by the file system rather
/// than an in-memory buffer.
pub const DISK_VERSION: i32 = -1;

/// An in-memory buffer for a single document part.
#[derive(Debug)]
struct Buffer {
    /// The buffer text.
    text: String,
    /// The line index for the buffer text.
    lines: LineIndex,
}

impl Buffer {
    /// Creates a new buffer from the given text.
    fn new(text: String) -> Self {
        let lines = LineIndex::new(&text);
        Self { text, lines }
    }
}

/// State for a single part of a document.
#[derive(Debug)]
struct Part {
    /// The version of the part.
    ///
    /// This is [`DISK_VERSION`] when the part has no in-memory buffer.
    version: i32,
    /// The in-memory buffer for the part, if the part is open.
    buffer: Option<Buffer>,
}

/// A versioned, multi-part text document.
///
/// A document has one part per URI fragment; documents without fragments use
/// part 0. Part versions never decrease while a part remains open; closing a
/// part resets its version to [`DISK_VERSION`].
#[derive(Debug, Default)]
pub struct TextDocument {
    /// The parts of the document, keyed by part index.
    parts: RwLock<BTreeMap<u32, Part>>,
}

impl TextDocument {
    /// Constructs a new document with no parts.
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets the version of the given part.
    ///
    /// Returns [`DISK_VERSION`] for parts that do not exist or have no
    /// in-memory buffer.
    pub fn version(&self, part: u32) -> i32 {
        self.parts
            .read()
            .get(&part)
            .map(|p| p.version)
            .unwrap_or(DISK_VERSION)
    }

    /// Gets the text of the given part.
    ///
    /// Returns `None` when the part does not exist or has no in-memory
    /// buffer.
    pub fn text(&self, part: u32) -> Option<String> {
        self.parts
            .read()
            .get(&part)
            .and_then(|p| p.buffer.as_ref())
            .map(|b| b.text.clone())
    }

    /// Gets the part indices of the document in ascending order.
    pub fn parts(&self) -> Vec<u32> {
        self.parts.read().keys().copied().collect()
    }

    /// Whether the given part has an in-memory buffer.
    pub fn is_open(&self, part: u32) -> bool {
        self.version(part) >= 0
    }

    /// Resets a part to the given version and text.
    ///
    /// A `None` text removes the in-memory buffer, reverting the part to its
    /// file system contents.
    pub fn reset(&self, part: u32, version: i32, text: Option<String>) {
        let mut parts = self.parts.write();
        let part = parts.entry(part).or_insert(Part {
            version: DISK_VERSION,
            buffer: None,
        });
        part.version = version;
        part.buffer = text.map(Buffer::new);
    }

    /// Applies a sequence of edits to a part, moving it from `from_version`
    /// to `to_version`.
    ///
    /// Edits are applied in order, each against the text produced by its
    /// predecessor. A whole-buffer edit replaces the part's contents and is
    /// acceptable from any starting version.
    pub fn update(
        &self,
        part: u32,
        from_version: i32,
        to_version: i32,
        edits: &[SourceEdit],
    ) -> Result<()> {
        trace!("updating part {part} from version {from_version} to {to_version}");

        let mut parts = self.parts.write();
        let part = parts.entry(part).or_insert(Part {
            version: DISK_VERSION,
            buffer: None,
        });

        // A whole-buffer edit discards everything before it, so start from the
        // last one when present
        let (mut buffer, remaining) = match edits.iter().rposition(|e| e.is_full()) {
            Some(index) => (Buffer::new(edits[index].text().to_string()), &edits[index + 1..]),
            None => match part.buffer.take() {
                Some(buffer) => (buffer, edits),
                None => bail!("cannot apply a ranged edit to a part with no buffer"),
            },
        };

        for edit in remaining {
            let mut text = std::mem::take(&mut buffer.text);
            edit.apply(&mut text, &buffer.lines)?;
            buffer = Buffer::new(text);
        }

        part.buffer = Some(buffer);
        part.version = to_version;
        Ok(())
    }

    /// Gets a snapshot of the current version of every part.
    pub(crate) fn part_versions(&self) -> BTreeMap<u32, i32> {
        self.parts
            .read()
            .iter()
            .map(|(part, state)| (*part, state.version))
            .collect()
    }
}

/// An opaque token identifying a parse generation.
///
/// A cookie carries the per-part version map observed when the parse was
/// submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCookie {
    /// The unique identifier of the parse generation.
    id: Uuid,
    /// The version of each part at the time of the parse.
    versions: BTreeMap<u32, i32>,
}

impl ParseCookie {
    /// Creates a cookie from the current versions of the given document.
    pub fn snapshot(document: &TextDocument) -> Self {
        Self {
            id: Uuid::new_v4(),
            versions: document.part_versions(),
        }
    }

    /// Gets the unique identifier of the parse generation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Gets the version of the given part at the time of the parse.
    pub fn version(&self, part: u32) -> Option<i32> {
        self.versions.get(&part).copied()
    }

    /// Iterates the parts and versions recorded by the cookie in ascending
    /// part order.
    pub fn parts(&self) -> impl Iterator<Item = (u32, i32)> + '_ {
        self.versions.iter().map(|(part, version)| (*part, *version))
    }

    /// Whether the cookie records no parts.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// A consistent (tree, cookie) pair captured from a completed parse.
#[derive(Clone)]
pub struct ParseSnapshot {
    /// The parsed syntax tree.
    pub tree: Arc<dyn SyntaxTree>,
    /// The cookie identifying the parse generation.
    pub cookie: ParseCookie,
}

impl fmt::Debug for ParseSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseSnapshot")
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

/// The kind of a document entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A Python source document that can be parsed and analyzed.
    Source,
    /// A document tracked for the client but not analyzable.
    External,
}

/// The server's handle for a file under management.
#[derive(Debug)]
pub struct Entry {
    /// The canonical (fragment free) URI identifying the entry.
    uri: Url,
    /// The kind of the entry.
    kind: EntryKind,
    /// The local file system path of the entry, if it has one.
    path: Option<PathBuf>,
    /// The document buffers for the entry.
    document: TextDocument,
    /// The module name of the entry, if known.
    module_name: RwLock<Option<String>>,
    /// The module aliases registered for the entry.
    aliases: RwLock<Vec<String>>,
    /// The most recent completed parse of the entry.
    parse: RwLock<Option<ParseSnapshot>>,
}

impl Entry {
    /// Creates a new entry for the given canonical URI.
    pub fn new(uri: Url, kind: EntryKind) -> Self {
        let path = uri.to_file_path().ok();
        Self {
            uri,
            kind,
            path,
            document: TextDocument::new(),
            module_name: Default::default(),
            aliases: Default::default(),
            parse: Default::default(),
        }
    }

    /// Gets the canonical URI of the entry.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Gets the kind of the entry.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Gets the local file system path of the entry, if it has one.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Whether the entry can be enqueued for analysis.
    pub fn is_analyzable(&self) -> bool {
        self.kind == EntryKind::Source
    }

    /// Gets the document buffers of the entry.
    pub fn document(&self) -> &TextDocument {
        &self.document
    }

    /// Gets the module name of the entry, if known.
    pub fn module_name(&self) -> Option<String> {
        self.module_name.read().clone()
    }

    /// Gets the registered module aliases of the entry.
    pub fn aliases(&self) -> Vec<String> {
        self.aliases.read().clone()
    }

    /// Records the module name and aliases registered for the entry.
    pub(crate) fn set_module_names(&self, name: Option<String>, aliases: Vec<String>) {
        *self.module_name.write() = name;
        *self.aliases.write() = aliases;
    }

    /// Gets the most recent completed parse of the entry.
    pub fn parse_snapshot(&self) -> Option<ParseSnapshot> {
        self.parse.read().clone()
    }

    /// Records a completed parse of the entry.
    pub(crate) fn set_parse_snapshot(&self, snapshot: ParseSnapshot) {
        *self.parse.write() = Some(snapshot);
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::edit::SourcePosition;
    use crate::edit::SourcePositionEncoding;

    #[test]
    fn it_reports_disk_version_for_unknown_parts() {
        let document = TextDocument::new();
        assert_eq!(document.version(0), DISK_VERSION);
        assert_eq!(document.version(7), DISK_VERSION);
        assert!(!document.is_open(0));
    }

    #[test]
    fn it_resets_and_reads_parts() {
        let document = TextDocument::new();
        document.reset(0, 1, Some("a".to_string()));
        document.reset(1, 1, Some("b".to_string()));

        assert_eq!(document.version(0), 1);
        assert_eq!(document.text(0).as_deref(), Some("a"));
        assert_eq!(document.text(1).as_deref(), Some("b"));
        assert_eq!(document.parts(), vec![0, 1]);

        document.reset(0, DISK_VERSION, None);
        assert!(!document.is_open(0));
        assert!(document.text(0).is_none());
        assert!(document.is_open(1));
    }

    #[test]
    fn it_applies_sequential_edits() {
        let document = TextDocument::new();
        document.reset(0, 1, Some("x".to_string()));

        document
            .update(
                0,
                1,
                2,
                &[
                    SourceEdit::new(
                        SourcePosition::new(0, 1)..SourcePosition::new(0, 1),
                        SourcePositionEncoding::UTF8,
                        "y",
                    ),
                    SourceEdit::new(
                        SourcePosition::new(0, 2)..SourcePosition::new(0, 2),
                        SourcePositionEncoding::UTF8,
                        "z",
                    ),
                ],
            )
            .expect("edits should apply");

        assert_eq!(document.text(0).as_deref(), Some("xyz"));
        assert_eq!(document.version(0), 2);
    }

    #[test]
    fn it_rejects_ranged_edits_without_a_buffer() {
        let document = TextDocument::new();
        let edit = SourceEdit::new(
            SourcePosition::new(0, 0)..SourcePosition::new(0, 0),
            SourcePositionEncoding::UTF8,
            "y",
        );
        assert!(document.update(0, 0, 1, &[edit]).is_err());
    }

    #[test]
    fn it_accepts_full_edits_from_any_state() {
        let document = TextDocument::new();
        document
            .update(0, 5, 6, &[SourceEdit::full("fresh")])
            .expect("full edit should apply");
        assert_eq!(document.text(0).as_deref(), Some("fresh"));
        assert_eq!(document.version(0), 6);
    }

    #[test]
    fn it_snapshots_part_versions_into_cookies() {
        let document = TextDocument::new();
        document.reset(0, 3, Some("a".to_string()));
        document.reset(2, 5, Some("b".to_string()));

        let cookie = ParseCookie::snapshot(&document);
        assert_eq!(cookie.version(0), Some(3));
        assert_eq!(cookie.version(2), Some(5));
        assert_eq!(cookie.version(1), None);
        assert_eq!(cookie.parts().collect::<Vec<_>>(), vec![(0, 3), (2, 5)]);
    }
}
