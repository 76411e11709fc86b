//! Helpers for converting between LSP structures and the analysis core.

use monty_analysis::DocumentChange;
use monty_analysis::SourceEdit;
use monty_analysis::SourcePosition;
use monty_analysis::SourcePositionEncoding;
use tower_lsp::jsonrpc::Error as RpcError;
use tower_lsp::jsonrpc::ErrorCode;
use tower_lsp::lsp_types::DidChangeTextDocumentParams;
use tower_lsp::lsp_types::Position;
use url::Url;

/// Converts a core error into a JSON-RPC response error.
pub(crate) fn rpc_error(error: monty_analysis::Error) -> RpcError {
    RpcError {
        code: ErrorCode::ServerError(error.code()),
        message: error.to_string().into(),
        data: None,
    }
}

/// Converts an LSP position into a source position.
pub(crate) fn source_position(position: Position) -> SourcePosition {
    SourcePosition::new(position.line, position.character)
}

/// Converts a change notification into a document change.
///
/// LSP positions are UTF-16 encoded; changes without a range replace the
/// entire buffer.
pub(crate) fn document_change(params: &mut DidChangeTextDocumentParams) -> DocumentChange {
    let edits = params
        .content_changes
        .iter_mut()
        .map(|change| match change.range {
            Some(range) => SourceEdit::new(
                source_position(range.start)..source_position(range.end),
                SourcePositionEncoding::UTF16,
                std::mem::take(&mut change.text),
            ),
            None => SourceEdit::full(std::mem::take(&mut change.text)),
        })
        .collect();

    DocumentChange {
        version: Some(params.text_document.version),
        edits: Some(edits),
    }
}

/// Gets the URI identifying one part of a document.
///
/// Part 0 is the document itself; other parts carry the part index in the
/// fragment.
pub(crate) fn part_uri(uri: &Url, part: u32) -> Url {
    if part == 0 {
        return uri.clone();
    }

    let mut uri = uri.clone();
    uri.set_fragment(Some(&part.to_string()));
    uri
}
