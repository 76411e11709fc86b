//! Handlers for workspace symbol requests.

use std::collections::HashSet;

use lsp_types::SymbolInformation;
use lsp_types::SymbolKind;

use crate::contracts::SemanticAnalyzer;
use crate::contracts::ValueKind;
use crate::store::DocumentStore;

/// Handles a workspace symbol request.
///
/// Collects module-declared members whose names start with the query,
/// case-insensitively. Members are deduplicated by name, first occurrence
/// wins.
pub(crate) fn workspace_symbol(
    store: &DocumentStore,
    analyzer: &dyn SemanticAnalyzer,
    query: &str,
) -> Vec<SymbolInformation> {
    let query = query.to_lowercase();
    let mut entries = store.entries();
    entries.sort_by(|a, b| a.uri().cmp(b.uri()));

    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for entry in entries {
        for member in analyzer.module_members(entry.uri()) {
            if !member.name.to_lowercase().starts_with(&query) {
                continue;
            }

            if !seen.insert(member.name.clone()) {
                continue;
            }

            #[allow(deprecated)]
            symbols.push(SymbolInformation {
                name: member.name,
                kind: symbol_kind(member.kind),
                tags: None,
                deprecated: None,
                location: member.location,
                container_name: entry.module_name(),
            });
        }
    }

    symbols
}

/// Maps a semantic value kind to an LSP symbol kind.
fn symbol_kind(kind: ValueKind) -> SymbolKind {
    match kind {
        ValueKind::Module => SymbolKind::MODULE,
        ValueKind::Class => SymbolKind::CLASS,
        ValueKind::Function => SymbolKind::FUNCTION,
        ValueKind::Method => SymbolKind::METHOD,
        ValueKind::Variable => SymbolKind::VARIABLE,
        ValueKind::Parameter => SymbolKind::VARIABLE,
        ValueKind::Keyword => SymbolKind::KEY,
        ValueKind::NamedArgument => SymbolKind::VARIABLE,
        ValueKind::Constant => SymbolKind::CONSTANT,
    }
}
