//! Handlers for hover requests.

use lsp_types::Hover;
use lsp_types::HoverContents;
use lsp_types::MarkedString;

use crate::contracts::AnalysisValue;
use crate::edit::SourcePosition;
use crate::handlers::Snapshot;

/// The maximum length of the expression label, in characters.
const MAX_LABEL_CHARS: usize = 4093;

/// The maximum number of lines in a hover.
const MAX_LINES: usize = 30;

/// The maximum number of characters per hover line.
const MAX_LINE_CHARS: usize = 200;

/// Handles a hover request against the given snapshot.
pub(crate) fn hover(snapshot: &Snapshot, position: SourcePosition) -> Option<Hover> {
    let label = snapshot.tree.find_expression(snapshot.part, position)?;
    let values =
        snapshot
            .services
            .analyzer
            .values(snapshot.entry.uri(), &label, position);

    let text = render(&label, &values);
    Some(Hover {
        contents: HoverContents::Scalar(MarkedString::String(text)),
        range: None,
    })
}

/// Renders the hover text for an expression and its analyzed values.
fn render(label: &str, values: &[AnalysisValue]) -> String {
    let label = truncate(label, MAX_LABEL_CHARS);

    if values.is_empty() {
        return format!("{label}: <unknown type>");
    }

    // A single value with a detailed description speaks for itself
    let text = if let [value] = values
        && let Some(long) = &value.long_description
    {
        long.clone()
    } else {
        let multiline = values
            .iter()
            .any(|value| value.short_description.contains('\n'));
        let separator = if multiline { "\n" } else { ", " };
        let descriptions: Vec<&str> = values
            .iter()
            .map(|value| value.short_description.as_str())
            .collect();
        format!(
            "{label}: {descriptions}",
            descriptions = descriptions.join(separator)
        )
    };

    clamp(&text)
}

/// Truncates a string to the given number of characters, appending an
/// ellipsis when truncated.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }

    let mut truncated: String = s.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

/// Collapses consecutive blank lines and bounds the rendered size.
fn clamp(text: &str) -> String {
    let mut lines = Vec::new();
    let mut previous_blank = false;
    let mut truncated = false;

    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;

        if lines.len() == MAX_LINES {
            truncated = true;
            break;
        }

        if line.chars().count() > MAX_LINE_CHARS {
            lines.push(truncate(line, MAX_LINE_CHARS));
        } else {
            lines.push(line.to_string());
        }
    }

    let mut result = lines.join("\n");
    if truncated {
        result.push('…');
    }

    result
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::contracts::ValueKind;

    #[test]
    fn it_renders_unknown_types() {
        assert_eq!(render("x", &[]), "x: <unknown type>");
    }

    #[test]
    fn it_joins_short_descriptions() {
        let values = [
            AnalysisValue::new("a", ValueKind::Variable).with_short_description("int"),
            AnalysisValue::new("b", ValueKind::Variable).with_short_description("str"),
        ];
        assert_eq!(render("x", &values), "x: int, str");
    }

    #[test]
    fn it_uses_newlines_when_any_description_is_multiline() {
        let values = [
            AnalysisValue::new("a", ValueKind::Variable).with_short_description("int"),
            AnalysisValue::new("b", ValueKind::Class).with_short_description("class C\nbases: ()"),
        ];
        assert_eq!(render("x", &values), "x: int\nclass C\nbases: ()");
    }

    #[test]
    fn it_prefers_a_single_long_description() {
        let values = [AnalysisValue::new("f", ValueKind::Function)
            .with_short_description("function f")
            .with_long_description("f(x)\n\nApplies f to x.")];
        assert_eq!(render("f", &values), "f(x)\n\nApplies f to x.");
    }

    #[test]
    fn it_collapses_consecutive_blank_lines() {
        let values = [AnalysisValue::new("f", ValueKind::Function)
            .with_long_description("one\n\n\n\ntwo")];
        assert_eq!(render("f", &values), "one\n\ntwo");
    }

    #[test]
    fn it_caps_line_count() {
        let long: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let values = [AnalysisValue::new("f", ValueKind::Function).with_long_description(long)];
        let rendered = render("f", &values);
        assert_eq!(rendered.lines().count(), MAX_LINES);
        assert!(rendered.ends_with('…'));
    }

    #[test]
    fn it_caps_line_length() {
        let values = [AnalysisValue::new("f", ValueKind::Function)
            .with_long_description("x".repeat(500))];
        let rendered = render("f", &values);
        assert_eq!(rendered.chars().count(), MAX_LINE_CHARS + 1);
        assert!(rendered.ends_with('…'));
    }

    #[test]
    fn it_truncates_the_label() {
        let label = "x".repeat(5000);
        let rendered = render(&label, &[]);
        assert!(rendered.starts_with(&"x".repeat(100)));
        assert!(rendered.contains('…'));
    }
}
