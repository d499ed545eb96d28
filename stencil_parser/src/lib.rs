#![deny(unreachable_pub)]
#![deny(elided_lifetimes_in_paths)]

//! Source-level parsing for stencil templates: the delimiter syntax, the
//! lexer that splits template text into a flat token stream, and the
//! `var|filter:arg` expression grammar.
//!
//! Structural parsing (block tags, nesting, the tag registry) lives in the
//! `stencil` crate; this crate has no knowledge of tag semantics.

use std::fmt;

pub mod expr;
pub mod lexer;

pub use expr::{parse_expr, Expr, FilterCall, Operand};
pub use lexer::{tokenize, Token, TokenKind};

/// The delimiter set recognized by the lexer. Delimiters can only be
/// substituted wholesale; all pairs change together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub block_start: String,
    pub block_end: String,
    pub var_start: String,
    pub var_end: String,
    pub comment_start: String,
    pub comment_end: String,
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            block_start: "{%".into(),
            block_end: "%}".into(),
            var_start: "{{".into(),
            var_end: "}}".into(),
            comment_start: "{#".into(),
            comment_end: "#}".into(),
        }
    }
}

/// A structural template error: malformed source, an unknown tag, a
/// mismatched terminator. Always fatal at parse time; carries the line the
/// offending token started on and a snippet of the surrounding source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    message: String,
    line: usize,
    near: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, near: impl Into<String>) -> Self {
        let mut near = near.into();
        if near.chars().count() > 40 {
            let cut = near
                .char_indices()
                .nth(40)
                .map(|(i, _)| i)
                .unwrap_or(near.len());
            near.truncate(cut);
            near.push_str("...");
        }
        Self {
            message: message.into(),
            line,
            near,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> usize {
        self.line
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.near.is_empty() {
            write!(f, "{} (line {})", self.message, self.line)
        } else {
            write!(f, "{} (line {}, near {:?})", self.message, self.line, self.near)
        }
    }
}

impl std::error::Error for ParseError {}
