//! Splits raw template source into a flat, ordered token stream. The lexer
//! has no nesting awareness; block structure is the parser's business.

use crate::{ParseError, Syntax};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    Var,
    Block,
    Comment,
}

/// One lexed unit of template source. `contents` is the trimmed inner text
/// for tag tokens and the raw text for `Text` tokens; `position` is the
/// byte span of the whole token, delimiters included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub contents: String,
    pub position: (usize, usize),
    pub lineno: usize,
}

impl Token {
    /// Splits block-tag contents on whitespace while keeping quoted
    /// sections (and `_("...")` translation markers) intact.
    pub fn split_contents(&self) -> Vec<String> {
        smart_split(&self.contents)
    }
}

/// Whitespace-splits `text`, treating single- and double-quoted runs as
/// atomic. A quote may be glued to a prefix, as in `greeting="hi there"`.
pub fn smart_split(text: &str) -> Vec<String> {
    let mut bits = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => {
                if c.is_whitespace() {
                    if !current.is_empty() {
                        bits.push(std::mem::take(&mut current));
                    }
                } else {
                    if c == '"' || c == '\'' {
                        quote = Some(c);
                    }
                    current.push(c);
                }
            }
        }
    }
    if !current.is_empty() {
        bits.push(current);
    }
    bits
}

/// Tokenizes `source`, always matching the earliest-starting delimiter of
/// any kind; everything before it becomes a `Text` token. An unterminated
/// delimiter is a hard error naming the offending line.
pub fn tokenize(source: &str, syntax: &Syntax) -> Result<Vec<Token>, ParseError> {
    let starts = [
        (syntax.block_start.as_str(), syntax.block_end.as_str(), TokenKind::Block),
        (syntax.var_start.as_str(), syntax.var_end.as_str(), TokenKind::Var),
        (syntax.comment_start.as_str(), syntax.comment_end.as_str(), TokenKind::Comment),
    ];

    let mut tokens = Vec::new();
    let mut offset = 0;
    let mut lineno = 1;

    while offset < source.len() {
        let rest = &source[offset..];
        let earliest = starts
            .iter()
            .filter_map(|&(start, end, kind)| {
                rest.find(start).map(|at| (at, start, end, kind))
            })
            .min_by_key(|&(at, start, _, _)| (at, std::cmp::Reverse(start.len())));

        let Some((at, start, end, kind)) = earliest else {
            tokens.push(Token {
                kind: TokenKind::Text,
                contents: rest.to_string(),
                position: (offset, source.len()),
                lineno,
            });
            break;
        };

        if at > 0 {
            let text = &rest[..at];
            tokens.push(Token {
                kind: TokenKind::Text,
                contents: text.to_string(),
                position: (offset, offset + at),
                lineno,
            });
            lineno += text.matches('\n').count();
        }

        let tag_start = offset + at;
        let inner_start = at + start.len();
        let Some(end_at) = rest[inner_start..].find(end) else {
            return Err(ParseError::new(
                format!("unterminated '{start}' tag"),
                lineno,
                &rest[at..],
            ));
        };
        let inner = &rest[inner_start..inner_start + end_at];
        let tag_end = tag_start + start.len() + end_at + end.len();
        tokens.push(Token {
            kind,
            contents: inner.trim().to_string(),
            position: (tag_start, tag_end),
            lineno,
        });
        lineno += rest[at..tag_end - offset].matches('\n').count();
        offset = tag_end;
    }

    Ok(tokens)
}
