//! Positions and edits applied to document sources.

use std::ops::Range;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use line_index::LineCol;
use line_index::LineIndex;
use line_index::WideEncoding;
use line_index::WideLineCol;

/// Represents a position in a document's source.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Default)]
pub struct SourcePosition {
    /// Line position in a document (zero-based).
    // NOTE: this field must come before `character` to maintain a correct sort order.
    pub line: u32,
    /// Character offset on a line in a document (zero-based). The meaning of
    /// this offset is determined by the position encoding.
    pub character: u32,
}

impl SourcePosition {
    /// Constructs a new source position from a line and character offset.
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Represents the encoding of a source position.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SourcePositionEncoding {
    /// A position's character is the UTF-8 offset from the start of the line.
    UTF8,
    /// A position's character is the UTF-16 offset from the start of the line.
    UTF16,
}

/// Represents an edit to a document's source.
///
/// An edit is either a ranged replacement or a whole-buffer replacement.
#[derive(Debug, Clone)]
pub struct SourceEdit {
    /// The range of the edit.
    ///
    /// A `None` range replaces the entire buffer.
    range: Option<Range<SourcePosition>>,
    /// The encoding of the edit positions.
    encoding: SourcePositionEncoding,
    /// The replacement text.
    text: String,
}

impl SourceEdit {
    /// Creates a new ranged edit with the given replacement text.
    pub fn new(
        range: Range<SourcePosition>,
        encoding: SourcePositionEncoding,
        text: impl Into<String>,
    ) -> Self {
        Self {
            range: Some(range),
            encoding,
            text: text.into(),
        }
    }

    /// Creates an edit that replaces the entire buffer.
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            encoding: SourcePositionEncoding::UTF8,
            text: text.into(),
        }
    }

    /// Whether this edit replaces the entire buffer.
    pub fn is_full(&self) -> bool {
        self.range.is_none()
    }

    /// Gets the replacement text of the edit.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Applies the edit to the given string.
    ///
    /// Ranged edits with invalid positions are rejected.
    pub(crate) fn apply(&self, source: &mut String, lines: &LineIndex) -> Result<()> {
        let range = match &self.range {
            Some(range) => range,
            None => {
                source.clear();
                source.push_str(&self.text);
                return Ok(());
            }
        };

        let (start, end) = match self.encoding {
            SourcePositionEncoding::UTF8 => (
                LineCol {
                    line: range.start.line,
                    col: range.start.character,
                },
                LineCol {
                    line: range.end.line,
                    col: range.end.character,
                },
            ),
            SourcePositionEncoding::UTF16 => (
                lines
                    .to_utf8(
                        WideEncoding::Utf16,
                        WideLineCol {
                            line: range.start.line,
                            col: range.start.character,
                        },
                    )
                    .context("invalid edit start position")?,
                lines
                    .to_utf8(
                        WideEncoding::Utf16,
                        WideLineCol {
                            line: range.end.line,
                            col: range.end.character,
                        },
                    )
                    .context("invalid edit end position")?,
            ),
        };

        let range: Range<usize> = lines
            .offset(start)
            .context("invalid edit start position")?
            .into()
            ..lines
                .offset(end)
                .context("invalid edit end position")?
                .into();

        if !source.is_char_boundary(range.start) {
            bail!("edit start position is not at a character boundary");
        }

        if !source.is_char_boundary(range.end) {
            bail!("edit end position is not at a character boundary");
        }

        source.replace_range(range, &self.text);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Applies a single edit to the given source.
    fn apply(source: &str, edit: SourceEdit) -> String {
        let mut text = source.to_string();
        let lines = LineIndex::new(source);
        edit.apply(&mut text, &lines).expect("edit should apply");
        text
    }

    #[test]
    fn it_applies_a_ranged_replacement() {
        let edit = SourceEdit::new(
            SourcePosition::new(0, 3)..SourcePosition::new(0, 8),
            SourcePositionEncoding::UTF8,
            "planet",
        );
        assert_eq!(apply("my world", edit), "my planet");
    }

    #[test]
    fn it_applies_an_insertion() {
        let edit = SourceEdit::new(
            SourcePosition::new(0, 1)..SourcePosition::new(0, 1),
            SourcePositionEncoding::UTF8,
            "y",
        );
        assert_eq!(apply("x", edit), "xy");
    }

    #[test]
    fn it_applies_a_deletion() {
        let edit = SourceEdit::new(
            SourcePosition::new(0, 0)..SourcePosition::new(0, 1),
            SourcePositionEncoding::UTF8,
            "",
        );
        assert_eq!(apply("xy", edit), "y");
    }

    #[test]
    fn it_replaces_the_entire_buffer() {
        let edit = SourceEdit::full("import os\n");
        assert_eq!(apply("anything at all", edit), "import os\n");
    }

    #[test]
    fn it_rejects_positions_outside_the_document() {
        let mut text = "x".to_string();
        let lines = LineIndex::new(&text);
        let edit = SourceEdit::new(
            SourcePosition::new(5, 0)..SourcePosition::new(5, 1),
            SourcePositionEncoding::UTF8,
            "y",
        );
        assert!(edit.apply(&mut text, &lines).is_err());
    }

    #[test]
    fn it_converts_utf16_positions() {
        // '😀' is two UTF-16 code units and four UTF-8 bytes
        let edit = SourceEdit::new(
            SourcePosition::new(0, 2)..SourcePosition::new(0, 3),
            SourcePositionEncoding::UTF16,
            "b",
        );
        assert_eq!(apply("😀a", edit), "😀b");
    }
}
