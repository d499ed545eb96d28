//! Render-time expression resolution: dotted-path variable lookup and the
//! filter pipeline, bound against a registry at parse time.

use std::fmt;

use log::debug;
use stencil_parser::expr::{parse_expr, Operand};
use stencil_parser::ParseError;

use crate::context::Context;
use crate::error::RenderError;
use crate::library::FilterDef;
use crate::parser::Parser;
use crate::value::{Safety, Value};

/// A dotted-path (or literal) variable reference.
#[derive(Debug, Clone)]
pub struct Variable {
    operand: Operand,
    text: String,
}

impl Variable {
    pub fn new(text: &str) -> Result<Self, ParseError> {
        let expr = parse_expr(text)?;
        if !expr.filters.is_empty() {
            return Err(ParseError::new(
                format!("variable '{}' may not contain filters", text.trim()),
                0,
                text,
            ));
        }
        Ok(Self {
            operand: expr.operand,
            text: text.trim().to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn resolve(&self, ctx: &Context) -> Result<Value, ResolutionFailure> {
        resolve_operand(&self.operand, ctx)
    }
}

/// Why a variable failed to resolve. Swallowed into the configured
/// invalid-string during normal rendering; surfaced as a render error in
/// strict mode.
#[derive(Debug, Clone)]
pub struct ResolutionFailure {
    pub path: String,
    pub reason: String,
}

impl ResolutionFailure {
    fn new(path: &[String], reason: impl Into<String>) -> Self {
        Self {
            path: path.join("."),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed lookup for [{}]: {}", self.path, self.reason)
    }
}

impl std::error::Error for ResolutionFailure {}

fn resolve_operand(operand: &Operand, ctx: &Context) -> Result<Value, ResolutionFailure> {
    match operand {
        Operand::Int(n) => Ok(Value::Int(*n)),
        Operand::Float(n) => Ok(Value::Float(*n)),
        // Literals written in the template itself are trusted markup.
        Operand::Str { value, translate } => {
            let text = if *translate {
                match ctx.engine() {
                    Some(engine) => engine.translations().gettext(value),
                    None => value.clone(),
                }
            } else {
                value.clone()
            };
            Ok(Value::Str(text, Safety::Safe))
        }
        Operand::Var(path) => resolve_path(path, ctx),
    }
}

fn resolve_path(path: &[String], ctx: &Context) -> Result<Value, ResolutionFailure> {
    let mut segments = path.iter();
    let first = segments
        .next()
        .ok_or_else(|| ResolutionFailure::new(path, "empty path"))?;
    let mut current = ctx
        .get(first)
        .cloned()
        .ok_or_else(|| ResolutionFailure::new(path, format!("'{first}' not in context")))?;
    current = maybe_call(current, path)?;
    for segment in segments {
        current = current
            .lookup(segment)
            .ok_or_else(|| ResolutionFailure::new(path, format!("no attribute '{segment}'")))?;
        current = maybe_call(current, path)?;
    }
    Ok(current)
}

/// Resolution invokes zero-argument callables it lands on. A callable
/// flagged `do_not_call` passes through untouched; one flagged
/// `alters_data` fails the whole lookup rather than run side effects.
fn maybe_call(value: Value, path: &[String]) -> Result<Value, ResolutionFailure> {
    let Value::Func(func) = &value else {
        return Ok(value);
    };
    if func.do_not_call {
        return Ok(value);
    }
    if func.alters_data {
        return Err(ResolutionFailure::new(path, "callable alters data"));
    }
    func.call()
        .map_err(|err| ResolutionFailure::new(path, err.to_string()))
}

struct BoundFilter {
    name: String,
    def: FilterDef,
    arg: Option<Operand>,
}

/// A parsed `var|filter:arg` expression with every filter name bound to
/// its registered definition. Binding happens at parse time so an unknown
/// filter is a syntax error, not a render error.
pub struct FilterExpression {
    operand: Operand,
    filters: Vec<BoundFilter>,
    text: String,
}

impl FilterExpression {
    pub fn new(token: &str, parser: &Parser) -> Result<Self, ParseError> {
        let expr = parse_expr(token)?;
        let mut filters = Vec::with_capacity(expr.filters.len());
        for call in expr.filters {
            let def = parser.find_filter(&call.name)?;
            filters.push(BoundFilter {
                name: call.name,
                def,
                arg: call.arg,
            });
        }
        Ok(Self {
            operand: expr.operand,
            filters,
            text: token.trim().to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// True when the head is a variable path rather than a literal.
    pub fn is_variable(&self) -> bool {
        matches!(self.operand, Operand::Var(_))
    }

    /// Resolves the head and runs the filter pipeline. A failed head
    /// lookup is swallowed into the configured invalid-string (a nonempty
    /// one short-circuits past the filters) unless the context is strict.
    pub fn resolve(&self, ctx: &Context) -> Result<Value, RenderError> {
        let value = match resolve_operand(&self.operand, ctx) {
            Ok(value) => value,
            Err(failure) => {
                if ctx.strict {
                    return Err(RenderError::msg(failure.to_string()));
                }
                debug!("swallowed variable failure: {failure}");
                if !ctx.string_if_invalid.is_empty() {
                    let text = ctx.string_if_invalid.replace("%s", &failure.path);
                    return Ok(Value::str(text));
                }
                Value::str("")
            }
        };
        self.apply_filters(value, ctx)
    }

    /// Like [`resolve`](Self::resolve), but a failed head lookup yields
    /// null instead of the invalid-string. Tags that branch on a value
    /// (`if`, `for`) use this form.
    pub fn resolve_lenient(&self, ctx: &Context) -> Result<Value, RenderError> {
        let value = match resolve_operand(&self.operand, ctx) {
            Ok(value) => value,
            Err(failure) => {
                if ctx.strict {
                    return Err(RenderError::msg(failure.to_string()));
                }
                debug!("swallowed variable failure: {failure}");
                Value::Null
            }
        };
        self.apply_filters(value, ctx)
    }

    fn apply_filters(&self, mut value: Value, ctx: &Context) -> Result<Value, RenderError> {
        for filter in &self.filters {
            // Filter arguments resolve leniently; a missing variable
            // argument becomes null.
            let arg = match &filter.arg {
                Some(operand) => Some(resolve_operand(operand, ctx).unwrap_or_else(|failure| {
                    debug!("swallowed filter argument failure: {failure}");
                    Value::Null
                })),
                None => None,
            };
            let input_safety = value.safety();
            value = (filter.def.func)(value, arg, ctx).map_err(|err| {
                RenderError::msg(format!("filter '{}' failed: {err}", filter.name))
            })?;
            if filter.def.is_safe && input_safety == Safety::Safe {
                value = value.mark_safe();
            }
        }
        Ok(value)
    }
}

impl fmt::Debug for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilterExpression({:?})", self.text)
    }
}
