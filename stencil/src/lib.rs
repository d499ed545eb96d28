//! Runtime text templating with a Django-flavored syntax: variables with
//! filter pipelines, an extensible block-tag registry, template
//! inheritance, and cached multi-source template resolution.
//!
//! The quickest way in is a standalone [`Template`]:
//!
//! ```rust
//! use stencil::{Context, Template};
//!
//! # fn main() -> Result<(), stencil::Error> {
//! let template = Template::new("Hello {{ name|upper }}!")?;
//! let mut ctx = Context::new();
//! ctx.insert("name", "world");
//! assert_eq!(template.render(&mut ctx)?, "Hello WORLD!");
//! # Ok(())
//! # }
//! ```
//!
//! Applications with named templates, inheritance or custom libraries go
//! through an [`Engine`], which resolves names through a loader chain and
//! caches parsed templates (and misses) until [`Engine::reset`]:
//!
//! ```rust
//! use stencil::{Context, Engine, LocmemLoader};
//!
//! # fn main() -> Result<(), stencil::Error> {
//! let engine = Engine::builder()
//!     .loader(LocmemLoader::new([
//!         ("base.html", "<title>{% block title %}Home{% endblock %}</title>"),
//!         ("page.html", "{% extends 'base.html' %}{% block title %}About{% endblock %}"),
//!     ]))
//!     .build();
//! let page = engine.get_template("page.html")?;
//! let html = page.render(&mut Context::new())?;
//! assert_eq!(html, "<title>About</title>");
//! # Ok(())
//! # }
//! ```

#![deny(elided_lifetimes_in_paths)]
#![deny(unreachable_pub)]

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod filters;
pub mod heritage;
pub mod i18n;
pub mod library;
pub mod loader;
pub mod node;
pub mod parser;
pub mod tags;
pub mod template;
pub mod value;

pub use crate::config::Config;
pub use crate::context::Context;
pub use crate::engine::{Engine, EngineBuilder};
pub use crate::error::{Error, ParseError, RenderError, Result, TemplateNotFound};
pub use crate::expr::{FilterExpression, ResolutionFailure, Variable};
pub use crate::i18n::{NullTranslations, Translations};
pub use crate::library::{FilterDef, Library};
pub use crate::loader::{FilesystemLoader, Loader, LocmemLoader, Origin, SourceError};
pub use crate::node::{CustomNode, Node, NodeList};
pub use crate::parser::Parser;
pub use crate::template::Template;
pub use crate::value::{to_value, HostFn, Safety, Value};
pub use stencil_parser::lexer::Token;
pub use stencil_parser::Syntax;
