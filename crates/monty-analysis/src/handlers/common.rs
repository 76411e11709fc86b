//! State shared by the read request handlers.

use std::sync::Arc;

use crate::contracts::SyntaxTree;
use crate::document::Entry;
use crate::document::ParseCookie;
use crate::interpreter::Interpreter;

/// A consistent view of one document captured at request time.
///
/// Handlers never read mutable entry state directly; everything they need is
/// resolved into the snapshot before the handler runs.
pub(crate) struct Snapshot {
    /// The entry the request targets.
    pub entry: Arc<Entry>,
    /// The part of the document the request targets.
    pub part: u32,
    /// The syntax tree of the most recent completed parse.
    pub tree: Arc<dyn SyntaxTree>,
    /// The cookie of the most recent completed parse.
    pub cookie: ParseCookie,
    /// The active language services.
    pub services: Arc<Interpreter>,
}
