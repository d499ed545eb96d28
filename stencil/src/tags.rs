//! The builtin tag library: loop and branch tags, the stateful `cycle`
//! and `ifchanged` tags, and the smaller utility tags.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;
use stencil_escape::collapse_between_tags;
use stencil_parser::lexer::Token;
use stencil_parser::ParseError;

use crate::context::Context;
use crate::engine::Engine;
use crate::error::RenderError;
use crate::expr::FilterExpression;
use crate::library::Library;
use crate::node::{render_value, CustomNode, Node, NodeList};
use crate::parser::Parser;
use crate::value::{Map, Value};

/// The tag set every engine carries without a `{% load %}`.
pub fn default_library() -> Library {
    let mut lib = Library::new();
    lib.tag("autoescape", compile_autoescape);
    lib.tag("comment", compile_comment);
    lib.tag("cycle", compile_cycle);
    lib.tag("filter", compile_filter_tag);
    lib.tag("firstof", compile_firstof);
    lib.tag("for", compile_for);
    lib.tag("if", compile_if);
    lib.tag("ifequal", |p, t| compile_ifequal(p, t, false));
    lib.tag("ifnotequal", |p, t| compile_ifequal(p, t, true));
    lib.tag("ifchanged", compile_ifchanged);
    lib.tag("load", compile_load);
    lib.tag("now", compile_now);
    lib.tag("regroup", compile_regroup);
    lib.tag("resetcycle", compile_resetcycle);
    lib.tag("spaceless", compile_spaceless);
    lib.tag("templatetag", compile_templatetag);
    lib.tag("widthratio", compile_widthratio);
    lib.tag("with", compile_with);
    lib
}

fn tag_error(token: &Token, message: impl Into<String>) -> ParseError {
    ParseError::new(message, token.lineno, &token.contents)
}

/// Reads the next token, which `Parser::parse(until)` guarantees is the
/// block tag it stopped on.
fn next_block(parser: &mut Parser, open: &Token) -> Result<Token, ParseError> {
    parser
        .next_token()
        .ok_or_else(|| tag_error(open, "unexpected end of template"))
}

fn first_word(token: &Token) -> String {
    token
        .split_contents()
        .first()
        .cloned()
        .unwrap_or_default()
}

static KWARG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:(\w+)=)?(.+)$").unwrap());

/// Consumes leading `name=value` bits, compiling each value. Stops at the
/// first bit that is not a keyword argument.
pub(crate) fn token_kwargs(
    bits: &mut Vec<String>,
    parser: &Parser,
) -> Result<Vec<(String, FilterExpression)>, ParseError> {
    let mut kwargs = Vec::new();
    while let Some(bit) = bits.first() {
        let Some(caps) = KWARG_RE.captures(bit) else {
            break;
        };
        let Some(name) = caps.get(1) else {
            break;
        };
        let value = caps.get(2).map_or("", |m| m.as_str()).to_string();
        let name = name.as_str().to_string();
        bits.remove(0);
        kwargs.push((name, parser.compile_filter(&value)?));
    }
    Ok(kwargs)
}

// ---------------------------------------------------------------------
// for

pub struct ForNode {
    pub loopvars: Vec<String>,
    pub sequence: FilterExpression,
    pub reversed: bool,
    pub body: NodeList,
    pub empty: Option<NodeList>,
}

impl ForNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let mut values = self.sequence.resolve_lenient(ctx)?.iter_sequence();
        if self.reversed {
            values.reverse();
        }
        if values.is_empty() {
            if let Some(empty) = &self.empty {
                empty.render(ctx, out)?;
            }
            return Ok(());
        }
        let parentloop = ctx.get("forloop").cloned().unwrap_or(Value::Null);
        let len = values.len();
        let mut scope = ctx.push();
        for (i, item) in values.into_iter().enumerate() {
            let mut forloop = Map::new();
            forloop.insert("counter".into(), Value::Int(i as i64 + 1));
            forloop.insert("counter0".into(), Value::Int(i as i64));
            forloop.insert("revcounter".into(), Value::Int((len - i) as i64));
            forloop.insert("revcounter0".into(), Value::Int((len - i - 1) as i64));
            forloop.insert("first".into(), Value::Bool(i == 0));
            forloop.insert("last".into(), Value::Bool(i == len - 1));
            forloop.insert("parentloop".into(), parentloop.clone());
            scope.insert("forloop", Value::Map(forloop));
            if self.loopvars.len() == 1 {
                scope.insert(self.loopvars[0].clone(), item);
            } else {
                let parts = match item {
                    Value::List(parts) if parts.len() == self.loopvars.len() => parts,
                    Value::List(parts) => {
                        return Err(RenderError::msg(format!(
                            "Need {} values to unpack in for loop; got {}",
                            self.loopvars.len(),
                            parts.len()
                        )))
                    }
                    _ => {
                        return Err(RenderError::msg(format!(
                            "Need {} values to unpack in for loop; got 1",
                            self.loopvars.len()
                        )))
                    }
                };
                for (name, part) in self.loopvars.iter().zip(parts) {
                    scope.insert(name.clone(), part);
                }
            }
            self.body.render(&mut scope, out)?;
        }
        Ok(())
    }

    pub(crate) fn child_nodelists(&self) -> Vec<&NodeList> {
        let mut lists = vec![&self.body];
        if let Some(empty) = &self.empty {
            lists.push(empty);
        }
        lists
    }
}

fn compile_for(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() < 4 {
        return Err(tag_error(
            token,
            format!(
                "'for' statements should have at least four words: {}",
                token.contents
            ),
        ));
    }
    let reversed = bits[bits.len() - 1] == "reversed";
    let in_index = if reversed { bits.len() - 3 } else { bits.len() - 2 };
    if bits[in_index] != "in" {
        return Err(tag_error(
            token,
            format!(
                "'for' statements should use the format 'for x in y': {}",
                token.contents
            ),
        ));
    }
    let loopvars: Vec<String> = bits[1..in_index]
        .join(" ")
        .split(',')
        .map(str::trim)
        .map(str::to_string)
        .collect();
    for var in &loopvars {
        if var.is_empty() || var.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
            return Err(tag_error(
                token,
                format!("'for' tag received an invalid argument: {}", token.contents),
            ));
        }
    }
    let sequence = parser.compile_filter(&bits[in_index + 1])?;
    let body = parser.parse(&["empty", "endfor"])?;
    let next = next_block(parser, token)?;
    let empty = if first_word(&next) == "empty" {
        let empty = parser.parse(&["endfor"])?;
        parser.delete_first_token();
        Some(empty)
    } else {
        None
    };
    Ok(Node::For(ForNode {
        loopvars,
        sequence,
        reversed,
        body,
        empty,
    }))
}

// ---------------------------------------------------------------------
// if / elif / else

#[derive(Clone, Copy, PartialEq, Eq)]
enum Join {
    Single,
    And,
    Or,
}

struct IfOperand {
    negated: bool,
    expr: FilterExpression,
}

/// A flat list of possibly-negated operands joined by one connective;
/// `and` and `or` may not be mixed within a single condition.
pub struct IfCondition {
    join: Join,
    operands: Vec<IfOperand>,
}

impl IfCondition {
    fn parse(bits: &[String], parser: &Parser, token: &Token) -> Result<Self, ParseError> {
        let improper = || tag_error(token, "'if' statement improperly formatted");
        let mut operands = Vec::new();
        let mut join = Join::Single;
        let mut iter = bits.iter();
        loop {
            let mut bit = iter.next().ok_or_else(improper)?;
            let mut negated = false;
            if bit == "not" {
                negated = true;
                bit = iter.next().ok_or_else(improper)?;
            }
            if bit == "and" || bit == "or" || bit == "not" {
                return Err(improper());
            }
            operands.push(IfOperand {
                negated,
                expr: parser.compile_filter(bit)?,
            });
            match iter.next().map(String::as_str) {
                None => break,
                Some(conn @ ("and" | "or")) => {
                    let this = if conn == "and" { Join::And } else { Join::Or };
                    if join != Join::Single && join != this {
                        return Err(tag_error(
                            token,
                            "'if' tags can't mix 'and' and 'or'",
                        ));
                    }
                    join = this;
                }
                Some(_) => return Err(improper()),
            }
        }
        Ok(Self { join, operands })
    }

    fn eval(&self, ctx: &Context) -> Result<bool, RenderError> {
        match self.join {
            Join::Single => self.operands[0].truth(ctx),
            Join::And => {
                for op in &self.operands {
                    if !op.truth(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Join::Or => {
                for op in &self.operands {
                    if op.truth(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

impl IfOperand {
    fn truth(&self, ctx: &Context) -> Result<bool, RenderError> {
        Ok(self.expr.resolve_lenient(ctx)?.is_truthy() != self.negated)
    }
}

pub struct IfNode {
    /// `(condition, body)` pairs; a `None` condition is the `else` arm.
    pub(crate) branches: Vec<(Option<IfCondition>, NodeList)>,
}

impl IfNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        for (condition, body) in &self.branches {
            let taken = match condition {
                Some(condition) => condition.eval(ctx)?,
                None => true,
            };
            if taken {
                return body.render(ctx, out);
            }
        }
        Ok(())
    }

    pub(crate) fn child_nodelists(&self) -> Vec<&NodeList> {
        self.branches.iter().map(|(_, body)| body).collect()
    }
}

fn compile_if(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    let mut branches = Vec::new();
    let condition = IfCondition::parse(&bits[1..], parser, token)?;
    let body = parser.parse(&["elif", "else", "endif"])?;
    branches.push((Some(condition), body));
    let mut next = next_block(parser, token)?;
    while first_word(&next) == "elif" {
        let bits = next.split_contents();
        let condition = IfCondition::parse(&bits[1..], parser, &next)?;
        let body = parser.parse(&["elif", "else", "endif"])?;
        branches.push((Some(condition), body));
        next = next_block(parser, token)?;
    }
    if first_word(&next) == "else" {
        let body = parser.parse(&["endif"])?;
        branches.push((None, body));
        parser.delete_first_token();
    }
    Ok(Node::If(IfNode { branches }))
}

// ---------------------------------------------------------------------
// ifequal / ifnotequal

pub struct IfEqualNode {
    pub left: FilterExpression,
    pub right: FilterExpression,
    pub negate: bool,
    pub body: NodeList,
    pub else_body: Option<NodeList>,
}

impl IfEqualNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let left = self.left.resolve_lenient(ctx)?;
        let right = self.right.resolve_lenient(ctx)?;
        if (left == right) != self.negate {
            self.body.render(ctx, out)
        } else if let Some(else_body) = &self.else_body {
            else_body.render(ctx, out)
        } else {
            Ok(())
        }
    }

    pub(crate) fn child_nodelists(&self) -> Vec<&NodeList> {
        let mut lists = vec![&self.body];
        if let Some(else_body) = &self.else_body {
            lists.push(else_body);
        }
        lists
    }
}

fn compile_ifequal(parser: &mut Parser, token: &Token, negate: bool) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() != 3 {
        return Err(tag_error(
            token,
            format!("'{}' takes two arguments", bits[0]),
        ));
    }
    let end_tag = format!("end{}", bits[0]);
    let left = parser.compile_filter(&bits[1])?;
    let right = parser.compile_filter(&bits[2])?;
    let body = parser.parse(&["else", end_tag.as_str()])?;
    let next = next_block(parser, token)?;
    let else_body = if first_word(&next) == "else" {
        let body = parser.parse(&[end_tag.as_str()])?;
        parser.delete_first_token();
        Some(body)
    } else {
        None
    };
    Ok(Node::IfEqual(IfEqualNode {
        left,
        right,
        negate,
        body,
        else_body,
    }))
}

// ---------------------------------------------------------------------
// cycle / resetcycle

/// Steps through its expressions, one per render of the node. The counter
/// lives in the node so the position survives across top-level renders of
/// the same template, which is what makes `cycle` useful for striping
/// rows emitted one render at a time.
pub struct CycleNode {
    exprs: Vec<FilterExpression>,
    counter: AtomicUsize,
    var_name: Option<String>,
    silent: bool,
}

impl CycleNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.exprs.len();
        let value = self.exprs[index].resolve(ctx)?;
        if let Some(name) = &self.var_name {
            ctx.insert(name.clone(), value.clone());
        }
        if !self.silent {
            render_value(&value, ctx, out);
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }
}

fn compile_cycle(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let mut bits = token.split_contents();
    if bits.len() < 2 {
        return Err(tag_error(token, "'cycle' tag requires at least two arguments"));
    }
    if bits.len() == 2 {
        // A bare name refers back to a cycle declared with `as`.
        let name = &bits[1];
        if parser.named_cycles.is_empty() {
            return Err(tag_error(
                token,
                format!("No named cycles in template. '{name}' is not defined"),
            ));
        }
        let Some(node) = parser.named_cycles.get(name.as_str()).cloned() else {
            return Err(tag_error(
                token,
                format!("Named cycle '{name}' is not defined"),
            ));
        };
        parser.last_cycle = Some(node.clone());
        return Ok(Node::Cycle(node));
    }
    let silent = bits.last().map(String::as_str) == Some("silent");
    if silent {
        bits.pop();
    }
    let as_name = if bits.len() > 2 && bits[bits.len() - 2] == "as" {
        let name = bits.pop().unwrap_or_default();
        bits.pop();
        Some(name)
    } else {
        None
    };
    if silent && as_name.is_none() {
        return Err(tag_error(
            token,
            "Only named cycles can be marked as silent: 'silent' requires 'as'",
        ));
    }
    let mut exprs = Vec::with_capacity(bits.len() - 1);
    for bit in &bits[1..] {
        exprs.push(parser.compile_filter(bit)?);
    }
    let node = Arc::new(CycleNode {
        exprs,
        counter: AtomicUsize::new(0),
        var_name: as_name.clone(),
        silent,
    });
    if let Some(name) = as_name {
        parser.named_cycles.insert(name, node.clone());
    }
    parser.last_cycle = Some(node.clone());
    Ok(Node::Cycle(node))
}

struct ResetCycleNode {
    cycle: Arc<CycleNode>,
}

impl CustomNode for ResetCycleNode {
    fn render(&self, _ctx: &mut Context, _out: &mut String) -> Result<(), RenderError> {
        self.cycle.reset();
        Ok(())
    }
}

fn compile_resetcycle(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    match bits.len() {
        1 => {
            let Some(cycle) = parser.last_cycle.clone() else {
                return Err(tag_error(token, "No cycles in template."));
            };
            Ok(Node::Custom(Arc::new(ResetCycleNode { cycle })))
        }
        2 => {
            let name = &bits[1];
            let Some(cycle) = parser.named_cycles.get(name.as_str()).cloned() else {
                return Err(tag_error(
                    token,
                    format!("Named cycle '{name}' does not exist."),
                ));
            };
            Ok(Node::Custom(Arc::new(ResetCycleNode { cycle })))
        }
        _ => Err(tag_error(token, "'resetcycle' tag accepts at most one argument.")),
    }
}

// ---------------------------------------------------------------------
// ifchanged

#[derive(Clone, PartialEq)]
enum IfChangedState {
    Text(String),
    Values(Vec<Value>),
}

/// Renders its body only when the watched state differs from the previous
/// render of this node. The last-seen state is kept in the node under a
/// mutex; entering the first iteration of an enclosing loop clears it.
pub struct IfChangedNode {
    pub(crate) exprs: Vec<FilterExpression>,
    pub(crate) body: NodeList,
    pub(crate) else_body: Option<NodeList>,
    last_seen: Mutex<Option<IfChangedState>>,
}

impl IfChangedNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let current = if self.exprs.is_empty() {
            IfChangedState::Text(self.body.render_to_string(ctx)?)
        } else {
            let mut values = Vec::with_capacity(self.exprs.len());
            for expr in &self.exprs {
                values.push(expr.resolve_lenient(ctx)?);
            }
            IfChangedState::Values(values)
        };
        let first_iteration = ctx
            .get("forloop")
            .and_then(|f| f.lookup("first"))
            .map_or(false, |v| v.is_truthy());
        let changed = {
            let mut last = self
                .last_seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if first_iteration {
                *last = None;
            }
            let changed = last.as_ref() != Some(&current);
            if changed {
                *last = Some(current.clone());
            }
            changed
        };
        if changed {
            match &current {
                IfChangedState::Text(text) => out.push_str(text),
                IfChangedState::Values(_) => self.body.render(ctx, out)?,
            }
        } else if let Some(else_body) = &self.else_body {
            else_body.render(ctx, out)?;
        }
        Ok(())
    }

    pub(crate) fn child_nodelists(&self) -> Vec<&NodeList> {
        let mut lists = vec![&self.body];
        if let Some(else_body) = &self.else_body {
            lists.push(else_body);
        }
        lists
    }
}

fn compile_ifchanged(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    let mut exprs = Vec::new();
    for bit in &bits[1..] {
        exprs.push(parser.compile_filter(bit)?);
    }
    let body = parser.parse(&["else", "endifchanged"])?;
    let next = next_block(parser, token)?;
    let else_body = if first_word(&next) == "else" {
        let body = parser.parse(&["endifchanged"])?;
        parser.delete_first_token();
        Some(body)
    } else {
        None
    };
    Ok(Node::IfChanged(IfChangedNode {
        exprs,
        body,
        else_body,
        last_seen: Mutex::new(None),
    }))
}

// ---------------------------------------------------------------------
// regroup

/// Groups consecutive items of a sequence by a common attribute, binding
/// the grouped structure into the surrounding scope.
pub struct RegroupNode {
    pub target: FilterExpression,
    pub grouper: FilterExpression,
    pub var_name: String,
}

impl RegroupNode {
    pub(crate) fn render(&self, ctx: &mut Context, _out: &mut String) -> Result<(), RenderError> {
        let list = self.target.resolve_lenient(ctx)?;
        if list.is_null() {
            ctx.set_upward(self.var_name.clone(), Value::List(Vec::new()));
            return Ok(());
        }
        let items = list.iter_sequence();
        let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
        {
            let mut scope = ctx.push();
            for item in items {
                // The item is exposed under the result name so the grouper
                // expression can be an ordinary dotted path.
                scope.insert(self.var_name.clone(), item.clone());
                let key = self.grouper.resolve_lenient(&scope)?;
                match groups.last_mut() {
                    Some((last_key, members)) if *last_key == key => members.push(item),
                    _ => groups.push((key, vec![item])),
                }
            }
        }
        let grouped: Vec<Value> = groups
            .into_iter()
            .map(|(key, members)| {
                let mut map = Map::new();
                map.insert("grouper".into(), key);
                map.insert("list".into(), Value::List(members));
                Value::Map(map)
            })
            .collect();
        ctx.set_upward(self.var_name.clone(), Value::List(grouped));
        Ok(())
    }
}

fn compile_regroup(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() != 6 {
        return Err(tag_error(token, "'regroup' tag takes five arguments"));
    }
    if bits[2] != "by" {
        return Err(tag_error(token, "second argument to 'regroup' tag must be 'by'"));
    }
    if bits[4] != "as" {
        return Err(tag_error(
            token,
            "next-to-last argument to 'regroup' tag must be 'as'",
        ));
    }
    let var_name = bits[5].clone();
    let target = parser.compile_filter(&bits[1])?;
    let grouper = parser.compile_filter(&format!("{var_name}.{}", bits[3]))?;
    Ok(Node::Regroup(RegroupNode {
        target,
        grouper,
        var_name,
    }))
}

// ---------------------------------------------------------------------
// spaceless

pub struct SpacelessNode {
    pub body: NodeList,
}

impl SpacelessNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let text = self.body.render_to_string(ctx)?;
        out.push_str(&collapse_between_tags(&text));
        Ok(())
    }
}

fn compile_spaceless(parser: &mut Parser, _token: &Token) -> Result<Node, ParseError> {
    let body = parser.parse(&["endspaceless"])?;
    parser.delete_first_token();
    Ok(Node::Spaceless(SpacelessNode { body }))
}

// ---------------------------------------------------------------------
// filter

/// Runs its body through a filter pipeline. The body's output enters the
/// pipeline as an already-rendered safe string.
pub struct FilterBlockNode {
    pub expr: FilterExpression,
    pub body: NodeList,
}

const FILTER_PIPELINE_VAR: &str = "pipeline_input";

impl FilterBlockNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let text = self.body.render_to_string(ctx)?;
        let mut scope = ctx.push();
        scope.insert(FILTER_PIPELINE_VAR, Value::safe(text));
        let value = self.expr.resolve(&scope)?;
        render_value(&value, &scope, out);
        Ok(())
    }
}

fn compile_filter_tag(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let rest = token.contents["filter".len()..].trim();
    for part in rest.split('|') {
        let name = part.trim().split(':').next().unwrap_or_default();
        if name == "escape" || name == "safe" {
            return Err(tag_error(
                token,
                format!("'filter {name}' is not permitted. Use the 'autoescape' tag instead."),
            ));
        }
    }
    let expr = parser.compile_filter(&format!("{FILTER_PIPELINE_VAR}|{rest}"))?;
    let body = parser.parse(&["endfilter"])?;
    parser.delete_first_token();
    Ok(Node::Filter(FilterBlockNode { expr, body }))
}

// ---------------------------------------------------------------------
// autoescape

struct AutoescapeNode {
    setting: bool,
    body: NodeList,
}

impl CustomNode for AutoescapeNode {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let old = ctx.autoescape;
        ctx.autoescape = self.setting;
        let result = self.body.render(ctx, out);
        ctx.autoescape = old;
        result
    }

    fn child_nodelists(&self) -> Vec<&NodeList> {
        vec![&self.body]
    }
}

fn compile_autoescape(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() != 2 {
        return Err(tag_error(token, "'autoescape' tag requires exactly one argument."));
    }
    let setting = match bits[1].as_str() {
        "on" => true,
        "off" => false,
        _ => {
            return Err(tag_error(
                token,
                "'autoescape' argument should be 'on' or 'off'",
            ))
        }
    };
    let body = parser.parse(&["endautoescape"])?;
    parser.delete_first_token();
    Ok(Node::Custom(Arc::new(AutoescapeNode { setting, body })))
}

// ---------------------------------------------------------------------
// comment

fn compile_comment(parser: &mut Parser, _token: &Token) -> Result<Node, ParseError> {
    parser.skip_past("endcomment")?;
    Ok(Node::Text(String::new()))
}

// ---------------------------------------------------------------------
// firstof

struct FirstofNode {
    exprs: Vec<FilterExpression>,
}

impl CustomNode for FirstofNode {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        for expr in &self.exprs {
            let value = expr.resolve_lenient(ctx)?;
            if value.is_truthy() {
                render_value(&value, ctx, out);
                return Ok(());
            }
        }
        Ok(())
    }
}

fn compile_firstof(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() < 2 {
        return Err(tag_error(token, "'firstof' statement requires at least one argument"));
    }
    let mut exprs = Vec::with_capacity(bits.len() - 1);
    for bit in &bits[1..] {
        exprs.push(parser.compile_filter(bit)?);
    }
    Ok(Node::Custom(Arc::new(FirstofNode { exprs })))
}

// ---------------------------------------------------------------------
// with

struct WithNode {
    extra: Vec<(String, FilterExpression)>,
    body: NodeList,
}

impl CustomNode for WithNode {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let mut vars = std::collections::HashMap::with_capacity(self.extra.len());
        for (name, expr) in &self.extra {
            vars.insert(name.clone(), expr.resolve_lenient(ctx)?);
        }
        let mut scope = ctx.push_with(vars);
        self.body.render(&mut scope, out)
    }

    fn child_nodelists(&self) -> Vec<&NodeList> {
        vec![&self.body]
    }
}

fn compile_with(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let mut bits = token.split_contents();
    bits.remove(0);
    // Legacy form: {% with value as name %}.
    let extra = if bits.len() == 3 && bits[1] == "as" {
        vec![(bits[2].clone(), parser.compile_filter(&bits[0])?)]
    } else {
        let extra = token_kwargs(&mut bits, parser)?;
        if extra.is_empty() || !bits.is_empty() {
            return Err(tag_error(
                token,
                format!(
                    "'with' expected at least one variable assignment: {}",
                    token.contents
                ),
            ));
        }
        extra
    };
    let body = parser.parse(&["endwith"])?;
    parser.delete_first_token();
    Ok(Node::Custom(Arc::new(WithNode { extra, body })))
}

// ---------------------------------------------------------------------
// widthratio

struct WidthRatioNode {
    value: FilterExpression,
    max_value: FilterExpression,
    max_width: FilterExpression,
    as_var: Option<String>,
}

impl CustomNode for WidthRatioNode {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let value = self.value.resolve_lenient(ctx)?;
        let max_value = self.max_value.resolve_lenient(ctx)?;
        let max_width = self.max_width.resolve_lenient(ctx)?;
        let (Some(value), Some(max_value), Some(max_width)) =
            (value.as_f64(), max_value.as_f64(), max_width.as_f64())
        else {
            return Ok(());
        };
        let ratio = if max_value == 0.0 {
            0
        } else {
            (value / max_value * max_width).round() as i64
        };
        match &self.as_var {
            Some(name) => ctx.insert(name.clone(), Value::Int(ratio)),
            None => write!(out, "{ratio}")?,
        }
        Ok(())
    }
}

fn compile_widthratio(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    let as_var = match bits.len() {
        4 => None,
        6 if bits[4] == "as" => Some(bits[5].clone()),
        _ => {
            return Err(tag_error(
                token,
                "'widthratio' takes at least three arguments",
            ))
        }
    };
    Ok(Node::Custom(Arc::new(WidthRatioNode {
        value: parser.compile_filter(&bits[1])?,
        max_value: parser.compile_filter(&bits[2])?,
        max_width: parser.compile_filter(&bits[3])?,
        as_var,
    })))
}

// ---------------------------------------------------------------------
// now

struct NowNode {
    format: String,
    as_var: Option<String>,
}

impl CustomNode for NowNode {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let mut text = String::new();
        match (ctx.use_tz, ctx.timezone) {
            (true, Some(tz)) => {
                let now = chrono::Utc::now().with_timezone(&tz);
                write!(text, "{}", now.format(&self.format))?;
            }
            _ => {
                let now = chrono::Local::now();
                write!(text, "{}", now.format(&self.format))?;
            }
        }
        match &self.as_var {
            Some(name) => {
                ctx.insert(name.clone(), Value::str(text));
            }
            None => out.push_str(&text),
        }
        Ok(())
    }
}

fn compile_now(_parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    let as_var = match bits.len() {
        2 => None,
        4 if bits[2] == "as" => Some(bits[3].clone()),
        _ => return Err(tag_error(token, "'now' statement takes one argument")),
    };
    let format = bits[1]
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    Ok(Node::Custom(Arc::new(NowNode { format, as_var })))
}

// ---------------------------------------------------------------------
// templatetag

struct TemplateTagNode {
    literal: &'static str,
}

impl CustomNode for TemplateTagNode {
    fn render(&self, _ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        out.push_str(self.literal);
        Ok(())
    }
}

const TEMPLATETAG_MAP: &[(&str, &str)] = &[
    ("openblock", "{%"),
    ("closeblock", "%}"),
    ("openvariable", "{{"),
    ("closevariable", "}}"),
    ("openbrace", "{"),
    ("closebrace", "}"),
    ("opencomment", "{#"),
    ("closecomment", "#}"),
];

fn compile_templatetag(_parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() != 2 {
        return Err(tag_error(token, "'templatetag' statement takes one argument"));
    }
    let Some(&(_, literal)) = TEMPLATETAG_MAP.iter().find(|(name, _)| *name == bits[1]) else {
        let names: Vec<&str> = TEMPLATETAG_MAP.iter().map(|(name, _)| *name).collect();
        return Err(tag_error(
            token,
            format!(
                "Invalid templatetag argument: '{}'. Must be one of: {}",
                bits[1],
                names.join(", ")
            ),
        ));
    };
    Ok(Node::Custom(Arc::new(TemplateTagNode { literal })))
}

// ---------------------------------------------------------------------
// load

fn compile_load(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    let Some(engine) = parser.engine.clone() else {
        return Err(tag_error(
            token,
            "'load' requires a template rendered through an engine",
        ));
    };
    // "load x y from lib" pulls named symbols out of one library.
    if bits.len() >= 4 && bits[bits.len() - 2] == "from" {
        let lib_name = &bits[bits.len() - 1];
        let library = find_library(&engine, lib_name, token)?;
        let mut subset = Library::new();
        for name in &bits[1..bits.len() - 2] {
            let mut found = false;
            if let Some(compiler) = library.tags.get(name) {
                subset.tags.insert(name.clone(), compiler.clone());
                found = true;
            }
            if let Some(def) = library.filters.get(name) {
                subset.filters.insert(name.clone(), def.clone());
                found = true;
            }
            if !found {
                return Err(tag_error(
                    token,
                    format!(
                        "'{name}' is not a valid tag or filter in tag library '{lib_name}'"
                    ),
                ));
            }
        }
        parser.add_library(&subset);
        return Ok(Node::Text(String::new()));
    }
    for name in &bits[1..] {
        let library = find_library(&engine, name, token)?;
        parser.add_library(&library);
    }
    Ok(Node::Text(String::new()))
}

fn find_library(engine: &Engine, name: &str, token: &Token) -> Result<Library, ParseError> {
    match engine.library(name) {
        Some(library) => Ok(library),
        None => {
            let mut known = engine.library_names();
            known.sort();
            Err(tag_error(
                token,
                format!(
                    "'{name}' is not a registered tag library. Must be one of: {}",
                    known.join(", ")
                ),
            ))
        }
    }
}
