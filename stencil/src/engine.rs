//! The engine: loader chain, library registry, render settings, and the
//! template resolution cache with negative caching.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, Weak};

use log::trace;
use stencil_parser::Syntax;

use crate::config::Config;
use crate::error::{Error, TemplateNotFound};
use crate::i18n::{NullTranslations, Translations};
use crate::library::Library;
use crate::loader::{FilesystemLoader, Loader, Origin};
use crate::template::Template;
use crate::{filters, heritage, i18n, tags};

/// A cheap-to-clone handle to shared engine state. Templates resolved
/// through the engine are parsed once and cached; misses are cached too,
/// so repeated lookups of an absent name stay cheap.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    loaders: Vec<Box<dyn Loader>>,
    libraries: HashMap<String, Library>,
    builtins: Vec<Library>,
    autoescape: bool,
    debug: bool,
    string_if_invalid: String,
    syntax: Syntax,
    translations: Arc<dyn Translations>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
}

/// Requested name plus a fingerprint of the skip set and directory
/// overrides in force for the lookup. Kept structured so a template name
/// can never collide with another entry's fingerprint.
type CacheKey = (String, u64);

enum CacheEntry {
    Found(Arc<Template>, Arc<Origin>),

    /// Negative hit without details; hits rebuild a bare error.
    Missing,

    /// Negative hit carrying the full tried list, kept in debug mode so
    /// repeated failures stay as informative as the first.
    MissingDetail(TemplateNotFound),
}

/// The builtin libraries every parse sees without a `{% load %}`.
pub(crate) fn default_builtins() -> Vec<Library> {
    vec![
        tags::default_library(),
        heritage::library(),
        filters::default_library(),
    ]
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// An engine with no loaders and default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn from_config(config: &Config) -> Self {
        Self::builder().config(config).build()
    }

    /// Resolves and parses `name` through the loader chain, consulting
    /// the cache first.
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>, Error> {
        self.get_template_with_dirs(name, None)
    }

    /// Like [`get_template`](Self::get_template) with a caller-supplied
    /// directory override for loaders that support one.
    pub fn get_template_with_dirs(
        &self,
        name: &str,
        dirs: Option<&[PathBuf]>,
    ) -> Result<Arc<Template>, Error> {
        self.find_template_impl(name, dirs, &[]).map(|(t, _)| t)
    }

    /// Returns the first template of `names` that exists.
    pub fn select_template(&self, names: &[&str]) -> Result<Arc<Template>, Error> {
        if names.is_empty() {
            return Err(Error::NotFound(TemplateNotFound::new(
                "No template names provided",
            )));
        }
        let mut combined = TemplateNotFound::new(names.join(", "));
        for name in names {
            match self.get_template(name) {
                Ok(template) => return Ok(template),
                Err(Error::NotFound(err)) => combined.tried.extend(err.tried),
                Err(other) => return Err(other),
            }
        }
        Err(Error::NotFound(combined))
    }

    /// Parses a one-off template bound to this engine but not cached.
    pub fn from_string(&self, source: &str) -> Result<Template, Error> {
        Template::from_source(source, None, Some(self))
    }

    /// Resolution used by `extends`: sources whose origin is already in
    /// `skip` are passed over rather than followed into a cycle.
    pub fn find_template(
        &self,
        name: &str,
        skip: &[Arc<Origin>],
    ) -> Result<(Arc<Template>, Arc<Origin>), Error> {
        self.find_template_impl(name, None, skip)
    }

    fn find_template_impl(
        &self,
        name: &str,
        dirs: Option<&[PathBuf]>,
        skip: &[Arc<Origin>],
    ) -> Result<(Arc<Template>, Arc<Origin>), Error> {
        let key = self.cache_key(name, dirs, skip);
        if let Ok(cache) = self.inner.cache.read() {
            match cache.get(&key) {
                Some(CacheEntry::Found(template, origin)) => {
                    trace!("template cache hit: {key:?}");
                    return Ok((template.clone(), origin.clone()));
                }
                Some(CacheEntry::Missing) => {
                    trace!("template cache negative hit: {key:?}");
                    return Err(Error::NotFound(TemplateNotFound::new(name)));
                }
                Some(CacheEntry::MissingDetail(err)) => {
                    trace!("template cache negative hit: {key:?}");
                    return Err(Error::NotFound(err.clone()));
                }
                None => {}
            }
        }
        trace!("template cache miss: {key:?}");

        let mut tried = Vec::new();
        for loader in &self.inner.loaders {
            for origin in loader.get_template_sources(name, dirs) {
                if skip.iter().any(|skipped| **skipped == origin) {
                    tried.push((origin, "Skipped to avoid recursion".to_string()));
                    continue;
                }
                match loader.get_contents(&origin) {
                    Ok(source) => {
                        let origin = Arc::new(origin);
                        // Parse errors propagate uncached; the next fetch
                        // sees the (possibly fixed) source again.
                        let template = Arc::new(Template::from_source(
                            &source,
                            Some(origin.clone()),
                            Some(self),
                        )?);
                        if let Ok(mut cache) = self.inner.cache.write() {
                            cache.insert(key, CacheEntry::Found(template.clone(), origin.clone()));
                        }
                        return Ok((template, origin));
                    }
                    Err(err) => tried.push((origin, err.to_string())),
                }
            }
        }

        let err = TemplateNotFound {
            name: name.to_string(),
            tried,
        };
        if let Ok(mut cache) = self.inner.cache.write() {
            let entry = if self.inner.debug {
                CacheEntry::MissingDetail(err.clone())
            } else {
                CacheEntry::Missing
            };
            cache.insert(key, entry);
        }
        Err(Error::NotFound(err))
    }

    /// Drops every cached template and negative entry.
    pub fn reset(&self) {
        if let Ok(mut cache) = self.inner.cache.write() {
            cache.clear();
        }
    }

    fn cache_key(&self, name: &str, dirs: Option<&[PathBuf]>, skip: &[Arc<Origin>]) -> CacheKey {
        let mut hasher = DefaultHasher::new();
        for origin in skip {
            if origin.template_name.as_deref() == Some(name) {
                origin.name.hash(&mut hasher);
            }
        }
        if let Some(dirs) = dirs {
            for dir in dirs {
                dir.hash(&mut hasher);
            }
        }
        (name.to_string(), hasher.finish())
    }

    pub(crate) fn library(&self, name: &str) -> Option<Library> {
        self.inner.libraries.get(name).cloned()
    }

    pub(crate) fn library_names(&self) -> Vec<String> {
        self.inner.libraries.keys().cloned().collect()
    }

    pub(crate) fn builtins(&self) -> &[Library] {
        &self.inner.builtins
    }

    pub fn autoescape(&self) -> bool {
        self.inner.autoescape
    }

    pub fn string_if_invalid(&self) -> &str {
        &self.inner.string_if_invalid
    }

    pub fn syntax(&self) -> &Syntax {
        &self.inner.syntax
    }

    pub fn translations(&self) -> &dyn Translations {
        self.inner.translations.as_ref()
    }

    pub(crate) fn downgrade(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<EngineInner>) -> Option<Engine> {
        weak.upgrade().map(|inner| Engine { inner })
    }
}

pub struct EngineBuilder {
    loaders: Vec<Box<dyn Loader>>,
    libraries: HashMap<String, Library>,
    builtins: Vec<Library>,
    autoescape: bool,
    debug: bool,
    string_if_invalid: String,
    syntax: Syntax,
    translations: Arc<dyn Translations>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        let mut libraries = HashMap::new();
        libraries.insert("i18n".to_string(), i18n::library());
        Self {
            loaders: Vec::new(),
            libraries,
            builtins: default_builtins(),
            autoescape: true,
            debug: false,
            string_if_invalid: String::new(),
            syntax: Syntax::default(),
            translations: Arc::new(NullTranslations),
        }
    }

    #[must_use]
    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    /// Adds a filesystem loader over `dirs`.
    #[must_use]
    pub fn dirs(self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.loader(FilesystemLoader::new(dirs))
    }

    /// Registers a library reachable through `{% load name %}`.
    #[must_use]
    pub fn library(mut self, name: impl Into<String>, library: Library) -> Self {
        self.libraries.insert(name.into(), library);
        self
    }

    /// Adds a library to the builtins in force without a `{% load %}`.
    #[must_use]
    pub fn builtin(mut self, library: Library) -> Self {
        self.builtins.push(library);
        self
    }

    #[must_use]
    pub fn autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn string_if_invalid(mut self, value: impl Into<String>) -> Self {
        self.string_if_invalid = value.into();
        self
    }

    #[must_use]
    pub fn syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    #[must_use]
    pub fn translations(mut self, translations: impl Translations + 'static) -> Self {
        self.translations = Arc::new(translations);
        self
    }

    /// Applies settings from a loaded configuration file.
    #[must_use]
    pub fn config(mut self, config: &Config) -> Self {
        if !config.dirs.is_empty() {
            self = self.dirs(config.dirs.clone());
        }
        if let Some(autoescape) = config.autoescape {
            self.autoescape = autoescape;
        }
        if let Some(debug) = config.debug {
            self.debug = debug;
        }
        if let Some(value) = &config.string_if_invalid {
            self.string_if_invalid = value.clone();
        }
        if let Some(syntax) = &config.syntax {
            self.syntax = syntax.to_syntax();
        }
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                loaders: self.loaders,
                libraries: self.libraries,
                builtins: self.builtins,
                autoescape: self.autoescape,
                debug: self.debug,
                string_if_invalid: self.string_if_invalid,
                syntax: self.syntax,
                translations: self.translations,
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
