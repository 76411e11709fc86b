//! Handlers for find-references requests.

use lsp_types::Location;
use lsp_types::Position;

use crate::contracts::ReferenceKind;
use crate::edit::SourcePosition;
use crate::handlers::Snapshot;

/// Handles a references request against the given snapshot.
///
/// When `include_declaration` is not set, definition and value references
/// are filtered out of the result.
pub(crate) fn references(
    snapshot: &Snapshot,
    position: SourcePosition,
    include_declaration: bool,
) -> Vec<Location> {
    let analyzer = &snapshot.services.analyzer;
    let uri = snapshot.entry.uri();
    let mut found: Vec<(ReferenceKind, Location)> = Vec::new();

    // A module import at the cursor contributes the module's declaration
    // locations
    if let Some(import) = snapshot.tree.find_import_name(snapshot.part, position) {
        for location in analyzer.module_definitions(&import) {
            found.push((ReferenceKind::Definition, location));
        }
    }

    if let Some(expression) = snapshot.tree.find_expression(snapshot.part, position) {
        for variable in analyzer.variables(uri, &expression, position) {
            if variable.kind == ReferenceKind::None {
                continue;
            }

            if !include_declaration
                && matches!(
                    variable.kind,
                    ReferenceKind::Definition | ReferenceKind::Value
                )
            {
                continue;
            }

            if let Some(location) = variable.location {
                found.push((variable.kind, location));
            }
        }
    }

    deduplicate(found)
}

/// Deduplicates references by URI and start position.
///
/// Within a duplicate group, the reference with the greatest end position
/// wins; ties are broken by the lowest reference kind.
fn deduplicate(mut found: Vec<(ReferenceKind, Location)>) -> Vec<Location> {
    /// An orderable form of a position.
    fn ordered(position: Position) -> (u32, u32) {
        (position.line, position.character)
    }

    /// The deduplication key of a reference.
    fn key(location: &Location) -> (&str, (u32, u32)) {
        (location.uri.as_str(), ordered(location.range.start))
    }

    found.sort_by(|(a_kind, a), (b_kind, b)| {
        key(a)
            .cmp(&key(b))
            .then(ordered(b.range.end).cmp(&ordered(a.range.end)))
            .then(a_kind.cmp(b_kind))
    });

    let mut result: Vec<Location> = Vec::new();
    for (_, location) in found {
        if result
            .last()
            .map(|previous| key(previous) == key(&location))
            .unwrap_or(false)
        {
            continue;
        }

        result.push(location);
    }

    result
}

#[cfg(test)]
mod test {
    use lsp_types::Range;
    use pretty_assertions::assert_eq;

    use super::*;

    /// Creates a location in a fixed document.
    fn location(start: (u32, u32), end: (u32, u32)) -> Location {
        Location {
            uri: "file:///a.py".parse().unwrap(),
            range: Range {
                start: Position::new(start.0, start.1),
                end: Position::new(end.0, end.1),
            },
        }
    }

    #[test]
    fn it_keeps_the_widest_reference_per_position() {
        let found = vec![
            (ReferenceKind::Reference, location((1, 0), (1, 3))),
            (ReferenceKind::Reference, location((1, 0), (1, 7))),
            (ReferenceKind::Reference, location((2, 0), (2, 1))),
        ];

        let result = deduplicate(found);
        assert_eq!(
            result,
            vec![location((1, 0), (1, 7)), location((2, 0), (2, 1))]
        );
    }

    #[test]
    fn it_breaks_ties_by_lowest_kind() {
        let found = vec![
            (ReferenceKind::Value, location((1, 0), (1, 3))),
            (ReferenceKind::Definition, location((1, 0), (1, 3))),
        ];

        // Both have the same span; the definition is preferred
        let result = deduplicate(found);
        assert_eq!(result.len(), 1);
    }
}
