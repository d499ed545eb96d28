//! Template inheritance: `extends`, `block` and `include`, plus the
//! per-render block override bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use stencil_parser::lexer::Token;
use stencil_parser::ParseError;

use crate::context::Context;
use crate::error::RenderError;
use crate::expr::FilterExpression;
use crate::library::Library;
use crate::loader::Origin;
use crate::node::{Node, NodeList};
use crate::parser::Parser;
use crate::tags::token_kwargs;
use crate::value::{Map, Value};

pub fn library() -> Library {
    let mut lib = Library::new();
    lib.tag("extends", compile_extends);
    lib.tag("block", compile_block);
    lib.tag("include", compile_include);
    lib
}

fn tag_error(token: &Token, message: impl Into<String>) -> ParseError {
    ParseError::new(message, token.lineno, &token.contents)
}

/// Per-render map from block name to its override chain, ordered from the
/// least derived template to the most derived. Rendering a block pops the
/// most derived definition; `block.super` peeks further down the chain.
#[derive(Default)]
pub(crate) struct BlockContext {
    blocks: HashMap<String, Vec<Arc<BlockNode>>>,
}

impl BlockContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds blocks from a less derived template; they slot in under any
    /// overrides already present.
    fn add_blocks(&mut self, blocks: &HashMap<String, Arc<BlockNode>>) {
        for (name, block) in blocks {
            self.blocks
                .entry(name.clone())
                .or_default()
                .insert(0, block.clone());
        }
    }

    fn pop(&mut self, name: &str) -> Option<Arc<BlockNode>> {
        self.blocks.get_mut(name).and_then(Vec::pop)
    }

    fn push(&mut self, name: &str, block: Arc<BlockNode>) {
        self.blocks.entry(name.to_string()).or_default().push(block);
    }
}

pub struct BlockNode {
    pub name: String,
    pub body: NodeList,
}

impl BlockNode {
    pub(crate) fn render(
        self: &Arc<Self>,
        ctx: &mut Context,
        out: &mut String,
    ) -> Result<(), RenderError> {
        let in_inheritance = ctx
            .render_frame()
            .map_or(false, |frame| frame.block_context.is_some());
        if !in_inheritance {
            return self.body.render(ctx, out);
        }
        let popped = ctx
            .render_frame_mut()
            .block_context
            .as_mut()
            .and_then(|bc| bc.pop(&self.name));
        let block = popped.clone().unwrap_or_else(|| self.clone());
        let super_text = render_super(ctx, &self.name)?;
        {
            let mut scope = ctx.push();
            scope.insert("block", block_var(&block.name, super_text));
            block.body.render(&mut scope, out)?;
        }
        if let Some(popped) = popped {
            if let Some(bc) = ctx.render_frame_mut().block_context.as_mut() {
                bc.push(&self.name, popped);
            }
        }
        Ok(())
    }
}

/// Renders the next definition down the override chain, so the body being
/// rendered can interpolate it as `block.super`. The chain is restored
/// afterwards.
///
/// Ancestor bodies run whether or not `block.super` is referenced, so
/// stateful tags inside them (`cycle`, `ifchanged`) advance on every
/// render of the derived template.
fn render_super(ctx: &mut Context, name: &str) -> Result<Option<String>, RenderError> {
    let parent = ctx
        .render_frame_mut()
        .block_context
        .as_mut()
        .and_then(|bc| bc.pop(name));
    let Some(parent) = parent else {
        return Ok(None);
    };
    let grandparent_text = render_super(ctx, name)?;
    let mut text = String::new();
    {
        let mut scope = ctx.push();
        scope.insert("block", block_var(name, grandparent_text));
        parent.body.render(&mut scope, &mut text)?;
    }
    if let Some(bc) = ctx.render_frame_mut().block_context.as_mut() {
        bc.push(name, parent);
    }
    Ok(Some(text))
}

fn block_var(name: &str, super_text: Option<String>) -> Value {
    let mut map = Map::new();
    map.insert("name".into(), Value::str(name));
    map.insert(
        "super".into(),
        super_text.map(Value::safe).unwrap_or(Value::Null),
    );
    Value::Map(map)
}

fn compile_block(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() != 2 {
        return Err(tag_error(token, "'block' tag takes only one argument"));
    }
    let name = bits[1].clone();
    if !parser.seen_blocks.insert(name.clone()) {
        return Err(tag_error(
            token,
            format!("'block' tag with name '{name}' appears more than once"),
        ));
    }
    let body = parser.parse(&["endblock"])?;
    let end = parser
        .next_token()
        .ok_or_else(|| tag_error(token, "unexpected end of template"))?;
    let end_bits = end.split_contents();
    if end_bits.len() > 2 || (end_bits.len() == 2 && end_bits[1] != name) {
        return Err(tag_error(
            &end,
            format!("expected 'endblock' or 'endblock {name}'"),
        ));
    }
    Ok(Node::Block(Arc::new(BlockNode { name, body })))
}

/// Replaces this template's output with its parent's, with this
/// template's blocks registered as overrides. Must be the first tag in
/// the template.
pub struct ExtendsNode {
    pub parent: FilterExpression,
    pub(crate) blocks: HashMap<String, Arc<BlockNode>>,
    pub(crate) origin: Option<Arc<Origin>>,
}

impl ExtendsNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let engine = ctx
            .engine()
            .cloned()
            .ok_or_else(|| RenderError::msg("'extends' requires rendering through an engine"))?;
        let parent_name = self.parent.resolve_lenient(ctx)?;
        let Some(name) = parent_name.as_str().map(str::to_string) else {
            return Err(RenderError::msg(format!(
                "invalid template name in 'extends': {}",
                self.parent.text()
            )));
        };

        // Seed the extend history with this template's own origin, so a
        // chain that leads back here is skipped rather than followed.
        {
            let frame = ctx.render_frame_mut();
            if frame.extends_history.is_empty() {
                if let Some(origin) = &self.origin {
                    frame.extends_history.push(origin.clone());
                }
            }
        }
        let skip = ctx.render_frame_mut().extends_history.clone();
        let (parent, origin) = engine.find_template(&name, &skip).map_err(render_not_found)?;
        ctx.render_frame_mut().extends_history.push(origin);

        {
            let frame = ctx.render_frame_mut();
            let bc = frame.block_context.get_or_insert_with(BlockContext::new);
            bc.add_blocks(&self.blocks);
            // A root parent never registers its own blocks, so do it for
            // it; a parent that extends further will register them itself.
            let parent_root = !parent
                .nodelist
                .nodes
                .iter()
                .any(|node| matches!(node, Node::Extends(_)));
            if parent_root {
                let mut parent_blocks = HashMap::new();
                for block in parent.nodelist.blocks() {
                    parent_blocks.insert(block.name.clone(), block);
                }
                bc.add_blocks(&parent_blocks);
            }
        }
        parent.nodelist.render(ctx, out)
    }
}

fn compile_extends(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() != 2 {
        return Err(tag_error(token, "'extends' takes one argument"));
    }
    let parent = parser.compile_filter(&bits[1])?;
    let body = parser.parse(&[])?;
    if body
        .nodes
        .iter()
        .any(|node| matches!(node, Node::Extends(_)))
    {
        return Err(tag_error(
            token,
            "'extends' cannot appear more than once in the same template",
        ));
    }
    let mut blocks = HashMap::new();
    for block in body.blocks() {
        blocks.insert(block.name.clone(), block);
    }
    Ok(Node::Extends(ExtendsNode {
        parent,
        blocks,
        origin: parser.origin.clone(),
    }))
}

/// Renders another template in place, optionally with extra bindings and
/// optionally cut off from the surrounding scope.
pub struct IncludeNode {
    pub template: FilterExpression,
    pub extra: Vec<(String, FilterExpression)>,
    pub isolated: bool,
}

impl IncludeNode {
    pub(crate) fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let engine = ctx
            .engine()
            .cloned()
            .ok_or_else(|| RenderError::msg("'include' requires rendering through an engine"))?;
        let template_name = self.template.resolve_lenient(ctx)?;
        let Some(name) = template_name.as_str().map(str::to_string) else {
            return Err(RenderError::msg(format!(
                "invalid template name in 'include': {}",
                self.template.text()
            )));
        };
        let template = engine.get_template(&name).map_err(render_not_found)?;
        let mut vars = std::collections::HashMap::with_capacity(self.extra.len());
        for (key, expr) in &self.extra {
            vars.insert(key.clone(), expr.resolve_lenient(ctx)?);
        }
        if self.isolated {
            let mut scope = ctx.isolated(vars);
            let mut frame = scope.push_render_frame();
            template.nodelist.render(&mut frame, out)
        } else {
            let mut scope = ctx.push_with(vars);
            let mut frame = scope.push_render_frame();
            template.nodelist.render(&mut frame, out)
        }
    }
}

fn render_not_found(err: crate::error::Error) -> RenderError {
    match err {
        crate::error::Error::NotFound(err) => RenderError::NotFound(err),
        crate::error::Error::Render(err) => err,
        other => RenderError::msg(other.to_string()),
    }
}

fn compile_include(parser: &mut Parser, token: &Token) -> Result<Node, ParseError> {
    let bits = token.split_contents();
    if bits.len() < 2 {
        return Err(tag_error(
            token,
            format!(
                "'include' tag takes at least one argument: the name of the template to be included: {}",
                token.contents
            ),
        ));
    }
    let template = parser.compile_filter(&bits[1])?;
    let mut extra = Vec::new();
    let mut isolated = false;
    let mut rest: Vec<String> = bits[2..].to_vec();
    while let Some(option) = rest.first().cloned() {
        rest.remove(0);
        match option.as_str() {
            "with" => {
                extra = token_kwargs(&mut rest, parser)?;
                if extra.is_empty() {
                    return Err(tag_error(
                        token,
                        "'with' in 'include' tag needs at least one keyword argument",
                    ));
                }
            }
            "only" => isolated = true,
            other => {
                return Err(tag_error(
                    token,
                    format!("Unknown argument for 'include' tag: '{other}'"),
                ));
            }
        }
    }
    Ok(Node::Include(IncludeNode {
        template,
        extra,
        isolated,
    }))
}
