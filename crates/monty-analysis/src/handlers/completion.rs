//! Handlers for completion requests.

use lsp_types::CompletionItem;
use lsp_types::CompletionItemKind;
use lsp_types::Documentation;

use crate::config::LanguageVersion;
use crate::contracts::AnalysisValue;
use crate::contracts::ValueKind;
use crate::edit::SourcePosition;
use crate::handlers::Snapshot;
use crate::keywords;

/// Options controlling a completion request.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// An explicit expression to complete against, bypassing tree walking.
    pub expression: Option<String>,
    /// When the completed expression has multiple possible types, return
    /// only members common to every type.
    pub intersect_multiple_results: bool,
    /// Whether statement keywords are offered.
    pub statement_keywords: bool,
    /// Whether expression keywords are offered.
    pub expression_keywords: bool,
    /// Whether the names of all known modules are offered.
    pub include_all_modules: bool,
    /// Whether named argument suggestions are offered inside calls.
    pub include_argument_names: bool,
    /// When set, only values of this kind are returned.
    pub filter_kind: Option<ValueKind>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            expression: None,
            intersect_multiple_results: false,
            statement_keywords: true,
            expression_keywords: true,
            include_all_modules: false,
            include_argument_names: false,
            filter_kind: None,
        }
    }
}

/// Handles a completion request against the given snapshot.
pub(crate) fn completion(
    snapshot: &Snapshot,
    position: SourcePosition,
    options: &CompletionOptions,
    version: LanguageVersion,
) -> Vec<CompletionItem> {
    let analyzer = &snapshot.services.analyzer;
    let uri = snapshot.entry.uri();

    let member_expression = options
        .expression
        .clone()
        .or_else(|| snapshot.tree.find_member_expression(snapshot.part, position));

    let mut values = match &member_expression {
        Some(expression) => analyzer.members(
            uri,
            expression,
            position,
            options.intersect_multiple_results,
        ),
        None => {
            let mut values =
                analyzer.available_names(uri, position, options.include_all_modules);

            if options.statement_keywords {
                values.extend(
                    keywords::statement_keywords(version)
                        .map(|keyword| AnalysisValue::new(keyword, ValueKind::Keyword)),
                );
            }

            if options.expression_keywords {
                values.extend(
                    keywords::expression_keywords(version)
                        .map(|keyword| AnalysisValue::new(keyword, ValueKind::Keyword)),
                );
            }

            if options.include_argument_names
                && let Some(call) = snapshot.tree.find_call(snapshot.part, position)
            {
                // Suggest the parameter names of every overload, minus the
                // arguments already present in the call
                let mut names = Vec::new();
                for overload in analyzer.overloads(uri, &call.callee, position) {
                    for parameter in overload.parameters {
                        if !call.argument_names.contains(&parameter.name)
                            && !names.contains(&parameter.name)
                        {
                            names.push(parameter.name);
                        }
                    }
                }

                values.extend(names.into_iter().map(|name| {
                    AnalysisValue::new(format!("{name}="), ValueKind::NamedArgument)
                }));
            }

            values
        }
    };

    if let Some(kind) = options.filter_kind {
        values.retain(|value| value.kind == kind);
    }

    values.into_iter().map(to_completion_item).collect()
}

/// Converts an analysis value into a completion item.
fn to_completion_item(value: AnalysisValue) -> CompletionItem {
    CompletionItem {
        label: value.name,
        kind: Some(completion_item_kind(value.kind)),
        documentation: value.documentation.map(Documentation::String),
        insert_text: value.insert_text,
        ..Default::default()
    }
}

/// Maps a semantic value kind to an LSP completion item kind.
fn completion_item_kind(kind: ValueKind) -> CompletionItemKind {
    match kind {
        ValueKind::Module => CompletionItemKind::MODULE,
        ValueKind::Class => CompletionItemKind::CLASS,
        ValueKind::Function => CompletionItemKind::FUNCTION,
        ValueKind::Method => CompletionItemKind::METHOD,
        ValueKind::Variable => CompletionItemKind::VARIABLE,
        ValueKind::Parameter => CompletionItemKind::VALUE,
        ValueKind::Keyword => CompletionItemKind::KEYWORD,
        ValueKind::NamedArgument => CompletionItemKind::VALUE,
        ValueKind::Constant => CompletionItemKind::CONSTANT,
    }
}
