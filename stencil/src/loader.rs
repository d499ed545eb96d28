//! Template sources. A [`Loader`] maps a template name to candidate
//! [`Origin`]s and fetches their contents; the engine walks loaders in
//! order and records why each candidate was rejected.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Identifies where a template came from: the concrete source name (a
/// filesystem path, or a key for in-memory sources), the name it was
/// requested under, and the loader that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub name: String,
    pub template_name: Option<String>,
    pub loader_name: Option<String>,
}

impl Origin {
    pub fn new(name: impl Into<String>, template_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            template_name: template_name.map(str::to_string),
            loader_name: None,
        }
    }

    #[must_use]
    pub fn with_loader(mut self, loader_name: impl Into<String>) -> Self {
        self.loader_name = Some(loader_name.into());
        self
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Why a single candidate source yielded no template.
#[derive(Debug)]
pub enum SourceError {
    NotFound,
    Io(io::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NotFound => f.write_str("Source does not exist"),
            SourceError::Io(err) => write!(f, "error reading source: {err}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<io::Error> for SourceError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            SourceError::NotFound
        } else {
            SourceError::Io(err)
        }
    }
}

pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    /// Candidate origins for `template_name`, in priority order. `dirs`
    /// is a caller-supplied directory override where the loader supports
    /// one.
    fn get_template_sources(&self, template_name: &str, dirs: Option<&[PathBuf]>) -> Vec<Origin>;

    fn get_contents(&self, origin: &Origin) -> Result<String, SourceError>;
}

/// Loads templates from an ordered list of directories. Template names
/// that escape the directory (absolute paths, `..` components) produce no
/// candidates.
pub struct FilesystemLoader {
    dirs: Vec<PathBuf>,
}

impl FilesystemLoader {
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }
}

fn is_contained(template_name: &str) -> bool {
    Path::new(template_name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl Loader for FilesystemLoader {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn get_template_sources(&self, template_name: &str, dirs: Option<&[PathBuf]>) -> Vec<Origin> {
        if !is_contained(template_name) {
            return Vec::new();
        }
        let dirs: &[PathBuf] = dirs.unwrap_or(&self.dirs);
        dirs.iter()
            .map(|dir| {
                Origin::new(
                    dir.join(template_name).to_string_lossy().into_owned(),
                    Some(template_name),
                )
                .with_loader(self.name())
            })
            .collect()
    }

    fn get_contents(&self, origin: &Origin) -> Result<String, SourceError> {
        Ok(std::fs::read_to_string(&origin.name)?)
    }
}

/// Serves templates from an in-memory map; mostly useful in tests and for
/// embedded defaults.
pub struct LocmemLoader {
    templates: HashMap<String, String>,
}

impl LocmemLoader {
    pub fn new(templates: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Loader for LocmemLoader {
    fn name(&self) -> &str {
        "locmem"
    }

    fn get_template_sources(&self, template_name: &str, _dirs: Option<&[PathBuf]>) -> Vec<Origin> {
        vec![Origin::new(template_name, Some(template_name)).with_loader(self.name())]
    }

    fn get_contents(&self, origin: &Origin) -> Result<String, SourceError> {
        self.templates
            .get(&origin.name)
            .cloned()
            .ok_or(SourceError::NotFound)
    }
}
