//! A parsed template: the node tree plus its provenance.

use std::sync::{Arc, Weak};

use stencil_parser::lexer::tokenize;
use stencil_parser::Syntax;

use crate::context::Context;
use crate::engine::{default_builtins, Engine, EngineInner};
use crate::error::{Error, RenderError};
use crate::loader::Origin;
use crate::node::NodeList;
use crate::parser::Parser;
use crate::value::Value;

pub struct Template {
    pub nodelist: NodeList,

    /// The name the template was requested under, when it came through a
    /// loader.
    pub name: Option<String>,
    pub origin: Option<Arc<Origin>>,

    /// Weak so cached templates don't keep the engine alive through its
    /// own cache.
    engine: Option<Weak<EngineInner>>,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Template {
    /// Parses a standalone template with the default syntax and builtin
    /// libraries. `extends` and `include` need an engine; use
    /// [`Engine::from_string`] for those.
    pub fn new(source: &str) -> Result<Self, Error> {
        Self::from_source(source, None, None)
    }

    pub(crate) fn from_source(
        source: &str,
        origin: Option<Arc<Origin>>,
        engine: Option<&Engine>,
    ) -> Result<Self, Error> {
        let syntax = engine.map_or_else(Syntax::default, |e| e.syntax().clone());
        let tokens = tokenize(source, &syntax)?;
        let builtins = match engine {
            Some(engine) => engine.builtins().to_vec(),
            None => default_builtins(),
        };
        let mut parser = Parser::new(tokens, &builtins, engine.cloned(), origin.clone());
        let nodelist = parser.parse(&[])?;
        Ok(Self {
            nodelist,
            name: origin.as_ref().and_then(|o| o.template_name.clone()),
            origin,
            engine: engine.map(Engine::downgrade),
        })
    }

    /// Renders against `ctx`. The context is bound to the template's
    /// engine (when there is one) and gets a fresh render frame, so
    /// inheritance state never leaks between renders.
    pub fn render(&self, ctx: &mut Context) -> Result<String, Error> {
        if let Some(weak) = &self.engine {
            if let Some(engine) = Engine::upgrade(weak) {
                ctx.bind_engine(&engine);
            }
        }
        let mut frame = ctx.push_render_frame();
        let mut out = String::new();
        self.nodelist.render(&mut frame, &mut out)?;
        Ok(out)
    }

    /// Renders against a fresh context seeded from `data`: a map becomes
    /// the context's variables, a null value or `None` means an empty
    /// context.
    pub fn render_data(&self, data: Option<Value>) -> Result<String, Error> {
        let mut ctx = Context::new();
        match data {
            None | Some(Value::Null) => {}
            Some(Value::Map(map)) => {
                for (key, value) in map {
                    ctx.insert(key, value);
                }
            }
            Some(_) => {
                return Err(Error::Render(RenderError::msg(
                    "context data must be a map or null",
                )));
            }
        }
        self.render(&mut ctx)
    }
}
