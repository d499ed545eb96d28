//! Shared fixtures for the integration tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stencil::{Loader, LocmemLoader, Origin, SourceError};

/// An in-memory loader that counts how often template contents are
/// actually fetched, for asserting on cache behavior.
pub struct CountingLoader {
    inner: LocmemLoader,
    fetches: Arc<AtomicUsize>,
}

impl CountingLoader {
    pub fn new(
        templates: impl IntoIterator<Item = (&'static str, &'static str)>,
    ) -> (Self, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let loader = Self {
            inner: LocmemLoader::new(templates),
            fetches: fetches.clone(),
        };
        (loader, fetches)
    }
}

impl Loader for CountingLoader {
    fn name(&self) -> &str {
        "counting"
    }

    fn get_template_sources(&self, template_name: &str, dirs: Option<&[PathBuf]>) -> Vec<Origin> {
        self.inner.get_template_sources(template_name, dirs)
    }

    fn get_contents(&self, origin: &Origin) -> Result<String, SourceError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.inner.get_contents(origin)
    }
}
