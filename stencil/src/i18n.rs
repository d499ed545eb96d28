//! Translation hooks and the `i18n` tag library. The engine carries a
//! [`Translations`] backend; the default backend is the identity.

use std::collections::HashMap;
use std::sync::Arc;

use stencil_escape::escape_html;
use stencil_parser::lexer::{Token, TokenKind};
use stencil_parser::ParseError;

use crate::context::Context;
use crate::error::RenderError;
use crate::expr::FilterExpression;
use crate::library::Library;
use crate::node::{render_value, CustomNode, Node};
use crate::parser::Parser;
use crate::value::{Safety, Value};

pub trait Translations: Send + Sync {
    fn gettext(&self, msgid: &str) -> String;

    fn ngettext(&self, singular: &str, plural: &str, count: i64) -> String;

    fn pgettext(&self, _context: &str, msgid: &str) -> String {
        self.gettext(msgid)
    }
}

/// Identity backend; every message translates to itself.
pub struct NullTranslations;

impl Translations for NullTranslations {
    fn gettext(&self, msgid: &str) -> String {
        msgid.to_string()
    }

    fn ngettext(&self, singular: &str, plural: &str, count: i64) -> String {
        if count == 1 {
            singular.to_string()
        } else {
            plural.to_string()
        }
    }
}

pub fn library() -> Library {
    let mut lib = Library::new();
    lib.tag("trans", compile_trans);
    lib.tag("blocktrans", compile_blocktrans);
    lib
}

fn tag_error(token: &Token, message: impl Into<String>) -> ParseError {
    ParseError::new(message, token.lineno, &token.contents)
}

fn translate(ctx: &Context, context_hint: Option<&str>, msgid: &str) -> String {
    match (ctx.engine(), context_hint) {
        (Some(engine), Some(hint)) => engine.translations().pgettext(hint, msgid),
        (Some(engine), None) => engine.translations().gettext(msgid),
        (None, _) => msgid.to_string(),
    }
}

// ---------------------------------------------------------------------
// trans

/// Renders a translated message. With `as`, the value is escaped the
/// same way direct output would be and then stored safe, so a later
/// `{{ var }}` emits the same bytes as the un-captured form.
struct TransNode {
    msgid: FilterExpression,
    noop: bool,
    context_hint: Option<String>,
    as_var: Option<String>,
}

impl CustomNode for TransNode {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let msgid = self.msgid.resolve_lenient(ctx)?.to_text();
        let text = if self.noop {
            msgid
        } else {
            translate(ctx, self.context_hint.as_deref(), &msgid)
        };
        match &self.as_var {
            Some(name) => {
                let text = if ctx.autoescape {
                    escape_html(&text).into_owned()
                } else {
                    text
                };
                ctx.insert(name.clone(), Value::safe(text));
            }
            None => render_value(&Value::str(text), ctx, out),
        }
        Ok(())
    }
}

fn compile_trans(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() < 2 {
        return Err(tag_error(token, "'trans' takes at least one argument"));
    }
    let msgid = parser.compile_filter(&bits[1])?;
    let mut noop = false;
    let mut context_hint = None;
    let mut as_var = None;
    let mut rest = bits[2..].iter();
    while let Some(option) = rest.next() {
        match option.as_str() {
            "noop" => noop = true,
            "context" => {
                let value = rest
                    .next()
                    .ok_or_else(|| tag_error(token, "no message context provided to 'trans'"))?;
                context_hint = Some(unquote(value));
            }
            "as" => {
                let name = rest
                    .next()
                    .ok_or_else(|| tag_error(token, "no variable name provided to 'trans ... as'"))?;
                as_var = Some(name.clone());
            }
            other => {
                return Err(tag_error(
                    token,
                    format!("unknown argument for 'trans' tag: '{other}'"),
                ));
            }
        }
    }
    Ok(Node::Custom(Arc::new(TransNode {
        msgid,
        noop,
        context_hint,
        as_var,
    })))
}

fn unquote(bit: &str) -> String {
    bit.trim_matches(|c| c == '"' || c == '\'').to_string()
}

// ---------------------------------------------------------------------
// blocktrans

/// One literal or placeholder piece of a translatable message.
enum MsgPart {
    Text(String),
    Var(String),
}

struct BlockTransNode {
    with_kwargs: Vec<(String, FilterExpression)>,
    count: Option<(String, FilterExpression)>,
    context_hint: Option<String>,
    singular: Vec<MsgPart>,
    plural: Option<Vec<MsgPart>>,
}

fn format_msgid(parts: &[MsgPart]) -> String {
    let mut msgid = String::new();
    for part in parts {
        match part {
            MsgPart::Text(text) => msgid.push_str(text),
            MsgPart::Var(name) => {
                msgid.push_str("%(");
                msgid.push_str(name);
                msgid.push_str(")s");
            }
        }
    }
    msgid
}

impl CustomNode for BlockTransNode {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let mut bindings: HashMap<String, Value> = HashMap::new();
        for (name, expr) in &self.with_kwargs {
            bindings.insert(name.clone(), expr.resolve_lenient(ctx)?);
        }
        if let Some((name, expr)) = &self.count {
            bindings.insert(name.clone(), expr.resolve_lenient(ctx)?);
        }

        let singular = format_msgid(&self.singular);
        let translated = match (&self.plural, &self.count) {
            (Some(plural), Some((count_name, _))) => {
                let n = bindings
                    .get(count_name)
                    .and_then(Value::as_int)
                    .unwrap_or(0);
                match ctx.engine() {
                    Some(engine) => {
                        engine
                            .translations()
                            .ngettext(&singular, &format_msgid(plural), n)
                    }
                    None => NullTranslations.ngettext(&singular, &format_msgid(plural), n),
                }
            }
            _ => translate(ctx, self.context_hint.as_deref(), &singular),
        };

        let mut result = translated;
        let parts = self
            .singular
            .iter()
            .chain(self.plural.iter().flatten());
        for part in parts {
            let MsgPart::Var(name) = part else { continue };
            let placeholder = format!("%({name})s");
            if !result.contains(&placeholder) {
                continue;
            }
            let value = bindings
                .get(name.as_str())
                .cloned()
                .or_else(|| ctx.get(name).cloned())
                .unwrap_or(Value::Null);
            let mut text = value.to_text();
            if ctx.autoescape && value.safety() == Safety::Unsafe {
                text = escape_html(&text).into_owned();
            }
            result = result.replace(&placeholder, &text);
        }
        out.push_str(&result);
        Ok(())
    }
}

/// Collects the literal/placeholder stream of one branch, stopping at
/// `plural` or `endblocktrans`. Only plain variables may appear inside.
fn collect_parts(parser: &mut Parser, open: &Token) -> Result<(Vec<MsgPart>, String), ParseError> {
    let mut parts = Vec::new();
    while let Some(token) = parser.next_token() {
        match token.kind {
            TokenKind::Text => parts.push(MsgPart::Text(token.contents)),
            TokenKind::Comment => {}
            TokenKind::Var => {
                let name = token.contents.trim().to_string();
                if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '|') {
                    return Err(tag_error(
                        &token,
                        format!("only plain variables are allowed inside 'blocktrans': '{name}'"),
                    ));
                }
                parts.push(MsgPart::Var(name));
            }
            TokenKind::Block => {
                let word = token
                    .split_contents()
                    .first()
                    .cloned()
                    .unwrap_or_default();
                if word == "plural" || word == "endblocktrans" {
                    return Ok((parts, word));
                }
                return Err(tag_error(
                    &token,
                    format!("'{word}' is not allowed inside 'blocktrans'"),
                ));
            }
        }
    }
    Err(tag_error(open, "'blocktrans' doesn't allow templates to end mid-block"))
}

fn compile_blocktrans(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let mut bits = token.split_contents();
    bits.remove(0);
    let mut with_kwargs = Vec::new();
    let mut count = None;
    let mut context_hint = None;
    while let Some(option) = bits.first().cloned() {
        bits.remove(0);
        match option.as_str() {
            "with" => {
                with_kwargs = crate::tags::token_kwargs(&mut bits, parser)?;
                if with_kwargs.is_empty() {
                    return Err(tag_error(
                        token,
                        "'with' in 'blocktrans' tag needs at least one keyword argument",
                    ));
                }
            }
            "count" => {
                let mut rest = bits.clone();
                let mut kwargs = crate::tags::token_kwargs(&mut rest, parser)?;
                if kwargs.len() != 1 {
                    return Err(tag_error(
                        token,
                        "'count' in 'blocktrans' tag expects exactly one keyword argument",
                    ));
                }
                bits = rest;
                count = kwargs.pop();
            }
            "context" => {
                let value = bits.first().cloned().ok_or_else(|| {
                    tag_error(token, "no message context provided to 'blocktrans'")
                })?;
                bits.remove(0);
                context_hint = Some(unquote(&value));
            }
            other => {
                return Err(tag_error(
                    token,
                    format!("unknown argument for 'blocktrans' tag: '{other}'"),
                ));
            }
        }
    }
    let (singular, terminator) = collect_parts(parser, token)?;
    let plural = if terminator == "plural" {
        if count.is_none() {
            return Err(tag_error(
                token,
                "'blocktrans' with a 'plural' branch requires 'count'",
            ));
        }
        let (parts, terminator) = collect_parts(parser, token)?;
        if terminator != "endblocktrans" {
            return Err(tag_error(
                token,
                "'blocktrans' allows only one 'plural' branch",
            ));
        }
        Some(parts)
    } else {
        None
    };
    Ok(Node::Custom(Arc::new(BlockTransNode {
        with_kwargs,
        count,
        context_hint,
        singular,
        plural,
    })))
}
