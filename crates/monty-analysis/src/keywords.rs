//! Python keyword tables used for completion.
//!
//! These are language surface data only; tokenization is the parser's
//! responsibility.

use crate::config::LanguageVersion;

/// Keywords that can only begin a statement.
const STATEMENT_KEYWORDS: &[&str] = &[
    "assert", "break", "class", "continue", "def", "del", "elif", "else", "except", "finally",
    "for", "from", "global", "if", "import", "pass", "raise", "return", "try", "while", "with",
];

/// Statement keywords specific to Python 2.
const STATEMENT_KEYWORDS_V2: &[&str] = &["exec", "print"];

/// Statement keywords specific to Python 3.
const STATEMENT_KEYWORDS_V3: &[&str] = &["async", "nonlocal"];

/// Keywords that may appear within an expression.
const EXPRESSION_KEYWORDS: &[&str] = &["and", "in", "is", "lambda", "not", "or", "yield"];

/// Expression keywords specific to Python 3.
const EXPRESSION_KEYWORDS_V3: &[&str] = &["False", "None", "True", "await"];

/// Gets the statement keywords for the given language version.
pub fn statement_keywords(version: LanguageVersion) -> impl Iterator<Item = &'static str> {
    let extra = if version.major >= 3 {
        STATEMENT_KEYWORDS_V3
    } else {
        STATEMENT_KEYWORDS_V2
    };
    STATEMENT_KEYWORDS.iter().chain(extra).copied()
}

/// Gets the expression keywords for the given language version.
pub fn expression_keywords(version: LanguageVersion) -> impl Iterator<Item = &'static str> {
    let extra = if version.major >= 3 {
        EXPRESSION_KEYWORDS_V3
    } else {
        &[][..]
    };
    EXPRESSION_KEYWORDS.iter().chain(extra).copied()
}
