//! Render-time state: a stack of variable scopes plus the per-render
//! bookkeeping the inheritance machinery needs.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::FixedOffset;

use crate::engine::Engine;
use crate::heritage::BlockContext;
use crate::loader::Origin;
use crate::value::Value;

/// The variable stack a template renders against. Scopes are pushed and
/// popped around loops, `with` blocks and included templates; lookups walk
/// the stack from the newest scope down.
pub struct Context {
    dicts: Vec<HashMap<String, Value>>,

    /// Toggled by the `autoescape` tag; consulted on every variable output.
    pub autoescape: bool,
    pub use_tz: bool,
    pub timezone: Option<FixedOffset>,
    pub locale: Option<String>,
    pub current_app: Option<String>,

    /// When set, a failed variable resolution becomes a render error
    /// instead of the invalid-string fallback.
    pub strict: bool,

    /// Copied from the engine when the context is bound to one.
    pub string_if_invalid: String,

    pub(crate) engine: Option<Engine>,
    pub(crate) render_context: Vec<RenderFrame>,
}

/// State scoped to one top-level `Template::render` call. Inheritance and
/// stateful tags stash data here so it never leaks across renders of the
/// same tree.
pub(crate) struct RenderFrame {
    pub block_context: Option<BlockContext>,
    /// Every origin this render has extended, for extend-cycle detection.
    pub extends_history: Vec<Arc<Origin>>,
    pub vars: HashMap<String, Value>,
}

impl RenderFrame {
    fn new() -> Self {
        Self {
            block_context: None,
            extends_history: Vec::new(),
            vars: HashMap::new(),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        let mut base = HashMap::new();
        base.insert("True".to_string(), Value::Bool(true));
        base.insert("False".to_string(), Value::Bool(false));
        base.insert("None".to_string(), Value::Null);
        // User data lives above the builtins, so `isolated` can keep the
        // builtins while hiding everything caller-supplied.
        Self {
            dicts: vec![base, HashMap::new()],
            autoescape: true,
            use_tz: false,
            timezone: None,
            locale: None,
            current_app: None,
            strict: false,
            string_if_invalid: String::new(),
            engine: None,
            render_context: Vec::new(),
        }
    }

    /// Binds this context to an engine, copying the engine's render
    /// settings. Called by `Template::render`.
    pub(crate) fn bind_engine(&mut self, engine: &Engine) {
        self.string_if_invalid = engine.string_if_invalid().to_string();
        self.autoescape = engine.autoescape();
        self.engine = Some(engine.clone());
    }

    pub(crate) fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.dicts
            .last_mut()
            .unwrap_or_else(|| unreachable!("context stack is never empty"))
            .insert(key.into(), value.into());
    }

    /// Looks `key` up from the newest scope down.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.dicts.iter().rev().find_map(|d| d.get(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key` in the nearest scope that already contains it, falling
    /// back to the base scope. Used by tags that publish results for
    /// surrounding code, like `regroup` and `cycle ... as name`.
    pub fn set_upward(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        for dict in self.dicts.iter_mut().rev() {
            if dict.contains_key(&key) {
                dict.insert(key, value);
                return;
            }
        }
        self.dicts[0].insert(key, value);
    }

    /// Pushes a fresh scope and returns a guard that pops it on drop.
    pub fn push(&mut self) -> ScopeGuard<'_> {
        self.dicts.push(HashMap::new());
        ScopeGuard { ctx: self }
    }

    /// Pushes a scope prefilled with `vars`.
    pub fn push_with(&mut self, vars: HashMap<String, Value>) -> ScopeGuard<'_> {
        self.dicts.push(vars);
        ScopeGuard { ctx: self }
    }

    /// Replaces the whole stack with the base scope plus `vars` for the
    /// lifetime of the guard. Used by `include ... only`.
    pub fn isolated(&mut self, vars: HashMap<String, Value>) -> IsolateGuard<'_> {
        let saved = std::mem::take(&mut self.dicts);
        let base = saved[0].clone();
        self.dicts = vec![base, vars];
        IsolateGuard { ctx: self, saved }
    }

    /// Opens a render frame for one top-level render and returns a guard
    /// that closes it.
    pub(crate) fn push_render_frame(&mut self) -> RenderFrameGuard<'_> {
        self.render_context.push(RenderFrame::new());
        RenderFrameGuard { ctx: self }
    }

    pub(crate) fn render_frame_mut(&mut self) -> &mut RenderFrame {
        self.render_context
            .last_mut()
            .unwrap_or_else(|| unreachable!("render outside a render frame"))
    }

    pub(crate) fn render_frame(&self) -> Option<&RenderFrame> {
        self.render_context.last()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ScopeGuard<'a> {
    ctx: &'a mut Context,
}

impl Deref for ScopeGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.ctx.dicts.pop();
    }
}

pub struct IsolateGuard<'a> {
    ctx: &'a mut Context,
    saved: Vec<HashMap<String, Value>>,
}

impl Deref for IsolateGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for IsolateGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for IsolateGuard<'_> {
    fn drop(&mut self) {
        self.ctx.dicts = std::mem::take(&mut self.saved);
    }
}

pub(crate) struct RenderFrameGuard<'a> {
    ctx: &'a mut Context,
}

impl Deref for RenderFrameGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for RenderFrameGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for RenderFrameGuard<'_> {
    fn drop(&mut self) {
        self.ctx.render_context.pop();
    }
}
