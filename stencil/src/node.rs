//! The compiled template tree. A parsed template is a [`NodeList`]; each
//! [`Node`] renders by appending to a shared output buffer.

use std::sync::Arc;

use stencil_escape::escape_html;

use crate::context::Context;
use crate::error::RenderError;
use crate::expr::FilterExpression;
use crate::heritage::{BlockNode, ExtendsNode, IncludeNode};
use crate::tags::{
    CycleNode, FilterBlockNode, ForNode, IfChangedNode, IfEqualNode, IfNode, RegroupNode,
    SpacelessNode,
};
use crate::value::{Safety, Value};

/// Implemented by tags registered from outside the engine. Custom nodes
/// live behind an `Arc` inside the tree, so they may carry their own
/// synchronized state.
pub trait CustomNode: Send + Sync {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError>;

    /// Whether the tag must be the first thing in a template, like
    /// `extends`.
    fn must_be_first(&self) -> bool {
        false
    }

    /// Nested nodelists, so tree walks (block collection) can descend
    /// into this node.
    fn child_nodelists(&self) -> Vec<&NodeList> {
        Vec::new()
    }
}

pub enum Node {
    Text(String),
    Variable(VariableNode),
    For(ForNode),
    If(IfNode),
    IfEqual(IfEqualNode),
    Cycle(Arc<CycleNode>),
    IfChanged(IfChangedNode),
    Regroup(RegroupNode),
    Spaceless(SpacelessNode),
    Filter(FilterBlockNode),
    Extends(ExtendsNode),
    Block(Arc<BlockNode>),
    Include(IncludeNode),
    Custom(Arc<dyn CustomNode>),
}

impl Node {
    pub fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        match self {
            Node::Text(text) => {
                out.push_str(text);
                Ok(())
            }
            Node::Variable(node) => node.render(ctx, out),
            Node::For(node) => node.render(ctx, out),
            Node::If(node) => node.render(ctx, out),
            Node::IfEqual(node) => node.render(ctx, out),
            Node::Cycle(node) => node.render(ctx, out),
            Node::IfChanged(node) => node.render(ctx, out),
            Node::Regroup(node) => node.render(ctx, out),
            Node::Spaceless(node) => node.render(ctx, out),
            Node::Filter(node) => node.render(ctx, out),
            Node::Extends(node) => node.render(ctx, out),
            Node::Block(node) => node.render(ctx, out),
            Node::Include(node) => node.render(ctx, out),
            Node::Custom(node) => node.render(ctx, out),
        }
    }

    pub fn must_be_first(&self) -> bool {
        match self {
            Node::Extends(_) => true,
            Node::Custom(node) => node.must_be_first(),
            _ => false,
        }
    }

    fn child_nodelists(&self) -> Vec<&NodeList> {
        match self {
            Node::Text(_) | Node::Variable(_) | Node::Cycle(_) | Node::Extends(_) => Vec::new(),
            Node::For(node) => node.child_nodelists(),
            Node::If(node) => node.child_nodelists(),
            Node::IfEqual(node) => node.child_nodelists(),
            Node::IfChanged(node) => node.child_nodelists(),
            Node::Regroup(_) | Node::Include(_) => Vec::new(),
            Node::Spaceless(node) => vec![&node.body],
            Node::Filter(node) => vec![&node.body],
            Node::Block(node) => vec![&node.body],
            Node::Custom(node) => node.child_nodelists(),
        }
    }
}

#[derive(Default)]
pub struct NodeList {
    pub nodes: Vec<Node>,
}

impl NodeList {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        for node in &self.nodes {
            node.render(ctx, out)?;
        }
        Ok(())
    }

    pub fn render_to_string(&self, ctx: &mut Context) -> Result<String, RenderError> {
        let mut out = String::new();
        self.render(ctx, &mut out)?;
        Ok(out)
    }

    /// Every block node in this tree, in document order, descending into
    /// nested nodelists.
    pub(crate) fn blocks(&self) -> Vec<Arc<BlockNode>> {
        let mut found = Vec::new();
        self.collect_blocks(&mut found);
        found
    }

    fn collect_blocks(&self, found: &mut Vec<Arc<BlockNode>>) {
        for node in &self.nodes {
            if let Node::Block(block) = node {
                found.push(block.clone());
            }
            for child in node.child_nodelists() {
                child.collect_blocks(found);
            }
        }
    }
}

/// A `{{ ... }}` output node.
pub struct VariableNode {
    pub expr: FilterExpression,
}

impl VariableNode {
    fn render(&self, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        let value = self.expr.resolve(ctx)?;
        render_value(&value, ctx, out);
        Ok(())
    }
}

/// Appends a value's text to the output, escaping according to the
/// value's own safety and the ambient autoescape flag.
pub(crate) fn render_value(value: &Value, ctx: &Context, out: &mut String) {
    let text = value.to_text();
    let escape = match value.safety() {
        Safety::Safe => false,
        Safety::MustEscape => true,
        Safety::Unsafe => ctx.autoescape,
    };
    if escape {
        out.push_str(&escape_html(&text));
    } else {
        out.push_str(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_value_escapes_unsafe() {
        let ctx = Context::new();
        let mut out = String::new();
        render_value(&Value::str("<b>"), &ctx, &mut out);
        assert_eq!(out, "&lt;b&gt;");
    }

    #[test]
    fn test_render_value_respects_safe() {
        let ctx = Context::new();
        let mut out = String::new();
        render_value(&Value::safe("<b>"), &ctx, &mut out);
        assert_eq!(out, "<b>");
    }

    #[test]
    fn test_render_value_must_escape_overrides_flag() {
        let mut ctx = Context::new();
        ctx.autoescape = false;
        let mut out = String::new();
        render_value(&Value::str("<b>").mark_for_escaping(), &ctx, &mut out);
        assert_eq!(out, "&lt;b&gt;");
    }
}
