//! The `var|filter:arg` expression grammar. Produces a purely syntactic
//! AST; binding filter names to functions happens in the `stencil` crate
//! against the active registry.

use nom::branch::alt;
use nom::bytes::complete::{escaped, is_not, tag};
use nom::character::complete::{anychar, char, digit1, one_of, satisfy};
use nom::combinator::{map, opt, recognize};
use nom::error::{Error, ErrorKind};
use nom::multi::{many0, many0_count};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::AsChar;

use crate::ParseError;

type ParseResult<'a, T = &'a str> = Result<(&'a str, T), nom::Err<Error<&'a str>>>;

/// The head of an expression or a filter argument: a literal, or a dotted
/// variable path to be resolved against a context at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Int(i64),
    Float(f64),
    Str { value: String, translate: bool },
    Var(Vec<String>),
}

/// One step of the filter pipeline: a name and an optional argument.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub arg: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub operand: Operand,
    pub filters: Vec<FilterCall>,
}

/// Parses a complete `var|filter:arg` expression. The whole input must be
/// consumed; trailing garbage is an error.
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new("empty expression", 0, input));
    }
    let (rest, operand) = operand(trimmed)
        .map_err(|_| ParseError::new(format!("could not parse expression '{trimmed}'"), 0, input))?;
    let (rest, filters) = many0(filter_call)(rest)
        .map_err(|_| ParseError::new(format!("could not parse expression '{trimmed}'"), 0, input))?;
    if !rest.trim().is_empty() {
        return Err(ParseError::new(
            format!("could not parse the remainder '{rest}' of '{trimmed}'"),
            0,
            input,
        ));
    }
    Ok(Expr { operand, filters })
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> ParseResult<'a, O>,
) -> impl FnMut(&'a str) -> ParseResult<'a, O> {
    delimited(
        many0_count(satisfy(char::is_whitespace)),
        inner,
        many0_count(satisfy(char::is_whitespace)),
    )
}

fn operand(i: &str) -> ParseResult<'_, Operand> {
    alt((
        map(translated_str, |value| Operand::Str {
            value,
            translate: true,
        }),
        map(str_lit, |value| Operand::Str {
            value,
            translate: false,
        }),
        num_lit,
        map(var_path, Operand::Var),
    ))(i)
}

fn translated_str(i: &str) -> ParseResult<'_, String> {
    delimited(tag("_("), str_lit, char(')'))(i)
}

fn str_lit(i: &str) -> ParseResult<'_, String> {
    let (i, quote) = one_of("\"'")(i)?;
    let not_quote: &str = if quote == '"' { "\\\"" } else { "\\'" };
    let (i, body) = opt(escaped(is_not(not_quote), '\\', anychar))(i)?;
    let (i, _) = char(quote)(i)?;
    Ok((i, unescape(body.unwrap_or_default(), quote)))
}

fn unescape(s: &str, quote: char) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == quote || next == '\\' => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn num_lit(i: &str) -> ParseResult<'_, Operand> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(tuple((digit1, opt(pair(char('.'), digit1))))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(i)?;
    // A numeric head may not run straight into identifier characters;
    // "2x" is not a number followed by a variable.
    if rest.starts_with(|c: char| c.is_alphanum() || c == '_' || c == '.') {
        return Err(nom::Err::Error(Error::new(i, ErrorKind::Digit)));
    }
    let op = if text.contains(['.', 'e', 'E']) {
        match text.parse::<f64>() {
            Ok(v) => Operand::Float(v),
            Err(_) => return Err(nom::Err::Error(Error::new(i, ErrorKind::Float))),
        }
    } else {
        match text.parse::<i64>() {
            Ok(v) => Operand::Int(v),
            Err(_) => return Err(nom::Err::Error(Error::new(i, ErrorKind::Digit))),
        }
    };
    Ok((rest, op))
}

fn identifier(i: &str) -> ParseResult<'_> {
    recognize(pair(
        satisfy(|c| c.is_alpha() || c >= '\u{0080}'),
        many0_count(satisfy(|c| c.is_alphanum() || c == '_' || c >= '\u{0080}')),
    ))(i)
}

/// A later path segment: any identifier-ish or numeric run, but never
/// starting with an underscore.
fn path_segment(i: &str) -> ParseResult<'_> {
    recognize(pair(
        satisfy(|c| c.is_alphanum() || c >= '\u{0080}'),
        many0_count(satisfy(|c| c.is_alphanum() || c == '_' || c >= '\u{0080}')),
    ))(i)
}

fn var_path(i: &str) -> ParseResult<'_, Vec<String>> {
    let (i, first) = identifier(i)?;
    let (i, rest) = many0(preceded(char('.'), path_segment))(i)?;
    let mut segments = Vec::with_capacity(1 + rest.len());
    segments.push(first.to_string());
    segments.extend(rest.into_iter().map(str::to_string));
    Ok((i, segments))
}

fn filter_call(i: &str) -> ParseResult<'_, FilterCall> {
    let (i, (_, name, arg)) = tuple((
        ws(char('|')),
        identifier,
        opt(preceded(
            char(':'),
            alt((
                map(translated_str, |value| Operand::Str {
                    value,
                    translate: true,
                }),
                map(str_lit, |value| Operand::Str {
                    value,
                    translate: false,
                }),
                num_lit,
                map(arg_path, Operand::Var),
            )),
        )),
    ))(i)?;
    Ok((
        i,
        FilterCall {
            name: name.to_string(),
            arg,
        },
    ))
}

// Filter arguments accept slightly laxer paths than expression heads;
// every segment is a plain `\w+` run.
fn arg_path(i: &str) -> ParseResult<'_, Vec<String>> {
    let (i, first) = path_segment(i)?;
    let (i, rest) = many0(preceded(char('.'), path_segment))(i)?;
    let mut segments = Vec::with_capacity(1 + rest.len());
    segments.push(first.to_string());
    segments.extend(rest.into_iter().map(str::to_string));
    Ok((i, segments))
}
