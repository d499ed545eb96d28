use std::fmt::{self, Display};

pub use stencil_parser::ParseError;

use crate::loader::Origin;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level engine error.
#[derive(Debug)]
pub enum Error {
    /// Malformed template source; raised at parse time only. No partial
    /// tree is ever returned.
    Syntax(ParseError),

    /// No provider supplied the named template.
    NotFound(TemplateNotFound),

    /// A failure while rendering a successfully parsed tree: a
    /// caller-supplied callable failed, or an engine limit was hit.
    Render(RenderError),

    /// Host data could not be converted into template values.
    Json(serde_json::Error),

    /// A configuration file could not be read or parsed.
    Config(basic_toml::Error),

    Io(std::io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Syntax(err) => err.fmt(f),
            Error::NotFound(err) => err.fmt(f),
            Error::Render(err) => err.fmt(f),
            Error::Json(err) => write!(f, "value conversion error: {err}"),
            Error::Config(err) => write!(f, "configuration error: {err}"),
            Error::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Syntax(err) => Some(err),
            Error::NotFound(err) => Some(err),
            Error::Render(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Config(err) => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Syntax(err)
    }
}

impl From<TemplateNotFound> for Error {
    fn from(err: TemplateNotFound) -> Self {
        Error::NotFound(err)
    }
}

impl From<RenderError> for Error {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::NotFound(err) => Error::NotFound(err),
            other => Error::Render(other),
        }
    }
}

impl From<TemplateNotFound> for RenderError {
    fn from(err: TemplateNotFound) -> Self {
        RenderError::NotFound(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<basic_toml::Error> for Error {
    fn from(err: basic_toml::Error) -> Self {
        Error::Config(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Raised when every provider was exhausted without a hit. Carries the
/// full list of attempted origins with the reason each one failed.
///
/// The type is a plain cloneable value so the resolution cache can store
/// a description of the failure and construct a fresh error on every
/// cache hit instead of re-raising a stored error object.
#[derive(Debug, Clone)]
pub struct TemplateNotFound {
    pub name: String,
    pub tried: Vec<(Origin, String)>,
}

impl TemplateNotFound {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tried: Vec::new(),
        }
    }
}

impl Display for TemplateNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template {:?} does not exist", self.name)?;
        if !self.tried.is_empty() {
            f.write_str("; tried:")?;
            for (origin, reason) in &self.tried {
                write!(f, "\n  {origin} ({reason})")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for TemplateNotFound {}

/// A render-time failure. The engine swallows only its own
/// "does not exist" condition; host failures surface through this type
/// unchanged.
#[derive(Debug)]
pub enum RenderError {
    Fmt(fmt::Error),

    /// An error returned by a caller-supplied callable or filter.
    Host(Box<dyn std::error::Error + Send + Sync>),

    /// An `extends` or `include` named a template no provider supplied.
    NotFound(TemplateNotFound),

    /// A rendering rule was violated (loop unpack mismatch, strict-mode
    /// variable miss, bad filter argument).
    Message(String),
}

impl RenderError {
    pub fn msg(message: impl Into<String>) -> Self {
        RenderError::Message(message.into())
    }

    pub fn host(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RenderError::Host(Box::new(err))
    }
}

impl Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Fmt(err) => write!(f, "formatting error: {err}"),
            RenderError::Host(err) => write!(f, "host error: {err}"),
            RenderError::NotFound(err) => err.fmt(f),
            RenderError::Message(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Fmt(err) => Some(err),
            RenderError::Host(err) => Some(err.as_ref()),
            RenderError::NotFound(err) => Some(err),
            RenderError::Message(_) => None,
        }
    }
}

impl From<fmt::Error> for RenderError {
    fn from(err: fmt::Error) -> Self {
        RenderError::Fmt(err)
    }
}
