//! Registration surface for tags and filters. A [`Library`] is a named
//! bundle of both; engines carry any number of libraries, a subset of
//! which ("builtins") is in force without a `{% load %}`.

use std::collections::HashMap;
use std::sync::Arc;

use stencil_parser::lexer::Token;
use stencil_parser::ParseError;

use crate::context::Context;
use crate::error::RenderError;
use crate::node::Node;
use crate::parser::Parser;
use crate::value::Value;

/// Compiles one block tag: consumes the opening token (and, for block
/// tags, further tokens through the parser) and yields a node.
pub type TagCompiler =
    Arc<dyn Fn(&mut Parser, &Token) -> Result<Node, ParseError> + Send + Sync>;

pub type FilterFn =
    Arc<dyn Fn(Value, Option<Value>, &Context) -> Result<Value, RenderError> + Send + Sync>;

/// A registered filter plus the flags governing how the engine wraps its
/// invocation.
#[derive(Clone)]
pub struct FilterDef {
    pub func: FilterFn,

    /// The filter never introduces unsafe characters; safe input yields
    /// safe output.
    pub is_safe: bool,

    /// The filter inspects the ambient autoescape flag itself and takes
    /// responsibility for its output's safety.
    pub needs_autoescape: bool,

    /// The filter wants datetimes shifted into the active timezone first.
    pub expects_localtime: bool,
}

impl FilterDef {
    pub fn new(
        func: impl Fn(Value, Option<Value>, &Context) -> Result<Value, RenderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            func: Arc::new(func),
            is_safe: false,
            needs_autoescape: false,
            expects_localtime: false,
        }
    }

    #[must_use]
    pub fn is_safe(mut self) -> Self {
        self.is_safe = true;
        self
    }

    #[must_use]
    pub fn needs_autoescape(mut self) -> Self {
        self.needs_autoescape = true;
        self
    }

    #[must_use]
    pub fn expects_localtime(mut self) -> Self {
        self.expects_localtime = true;
        self
    }
}

#[derive(Clone, Default)]
pub struct Library {
    pub(crate) tags: HashMap<String, TagCompiler>,
    pub(crate) filters: HashMap<String, FilterDef>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(
        &mut self,
        name: impl Into<String>,
        compiler: impl Fn(&mut Parser, &Token) -> Result<Node, ParseError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.tags.insert(name.into(), Arc::new(compiler));
        self
    }

    /// Registers a filter with default flags.
    pub fn filter(
        &mut self,
        name: impl Into<String>,
        func: impl Fn(Value, Option<Value>, &Context) -> Result<Value, RenderError>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.filters.insert(name.into(), FilterDef::new(func));
        self
    }

    pub fn filter_def(&mut self, name: impl Into<String>, def: FilterDef) -> &mut Self {
        self.filters.insert(name.into(), def);
        self
    }

    /// Merges `other` into this library; later registrations win.
    pub fn extend(&mut self, other: &Library) {
        for (name, compiler) in &other.tags {
            self.tags.insert(name.clone(), compiler.clone());
        }
        for (name, def) in &other.filters {
            self.filters.insert(name.clone(), def.clone());
        }
    }
}
