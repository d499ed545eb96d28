//! Optional TOML configuration, conventionally `stencil.toml` next to
//! the application. Applied through [`EngineBuilder::config`].
//!
//! [`EngineBuilder::config`]: crate::engine::EngineBuilder::config

use std::path::{Path, PathBuf};

use serde::Deserialize;
use stencil_parser::Syntax;

use crate::error::Error;

pub const CONFIG_FILE_NAME: &str = "stencil.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
    pub autoescape: Option<bool>,
    pub debug: Option<bool>,
    pub string_if_invalid: Option<String>,
    pub syntax: Option<SyntaxConfig>,
}

/// Delimiter overrides. All six must be given; partial syntaxes are too
/// easy to get wrong.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntaxConfig {
    pub block_start: String,
    pub block_end: String,
    pub var_start: String,
    pub var_end: String,
    pub comment_start: String,
    pub comment_end: String,
}

impl SyntaxConfig {
    pub(crate) fn to_syntax(&self) -> Syntax {
        Syntax {
            block_start: self.block_start.clone(),
            block_end: self.block_end.clone(),
            var_start: self.var_start.clone(),
            var_end: self.var_end.clone(),
            comment_start: self.comment_start.clone(),
            comment_end: self.comment_end.clone(),
        }
    }
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self, Error> {
        Ok(basic_toml::from_str(source)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }
}
