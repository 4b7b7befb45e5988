use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use confer_format::ProcessorSelector;
use confer_types::{BackendKind, RepositoryDefinition};
use tracing::debug;

use crate::embedded::{EmbeddedStreamSource, ResourceBundle};
use crate::error::{SourceError, SourceResult};
use crate::file::FileStreamSource;
use crate::git::GitStreamSource;
use crate::object::{ObjectClientFactory, ObjectStorageSource};
use crate::traits::StreamSource;

type Constructor = Box<
    dyn Fn(RepositoryDefinition, Arc<ProcessorSelector>) -> SourceResult<Arc<dyn StreamSource>>
        + Send
        + Sync,
>;

/// Builds stream sources from repository definitions by backend kind.
///
/// Filesystem and git sources need nothing from the host and are always
/// available through [`SourceRegistry::builtin`]. Object storage needs a
/// client factory and embedded sources need a resource bundle, so those are
/// registered explicitly. All sources built by one registry share its
/// processor selector.
pub struct SourceRegistry {
    constructors: BTreeMap<BackendKind, Constructor>,
    processors: Arc<ProcessorSelector>,
}

impl SourceRegistry {
    /// A registry with no backends.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
            processors: Arc::new(ProcessorSelector::standard()),
        }
    }

    /// Filesystem and git backends.
    pub fn builtin() -> Self {
        Self::new()
            .with(BackendKind::File, |def, processors| {
                Ok(Arc::new(FileStreamSource::new(def)?.with_processors(processors)))
            })
            .with(BackendKind::Git, |def, processors| {
                Ok(Arc::new(GitStreamSource::new(def)?.with_processors(processors)))
            })
    }

    /// Register object storage with connections made by `factory`.
    pub fn with_object_storage(self, factory: Arc<dyn ObjectClientFactory>) -> Self {
        self.with(BackendKind::ObjectStorage, move |def, processors| {
            let source = ObjectStorageSource::new(def, Arc::clone(&factory))?;
            Ok(Arc::new(source.with_processors(processors)))
        })
    }

    /// Register embedded sources serving `bundle`.
    pub fn with_embedded(self, bundle: Arc<ResourceBundle>) -> Self {
        self.with(BackendKind::Classpath, move |def, processors| {
            let source = EmbeddedStreamSource::new(def, Arc::clone(&bundle))?;
            Ok(Arc::new(source.with_processors(processors)))
        })
    }

    /// Share `processors` with every source built from now on.
    pub fn with_processors(mut self, processors: ProcessorSelector) -> Self {
        self.processors = Arc::new(processors);
        self
    }

    /// Register or replace the constructor for `kind`.
    pub fn with<F>(mut self, kind: BackendKind, constructor: F) -> Self
    where
        F: Fn(RepositoryDefinition, Arc<ProcessorSelector>) -> SourceResult<Arc<dyn StreamSource>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind, Box::new(constructor));
        self
    }

    pub fn supports(&self, kind: BackendKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Registered backend kinds, in [`BackendKind`] order.
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.constructors.keys().copied().collect()
    }

    /// Build an uninitialized source for `definition`.
    pub fn build(&self, definition: RepositoryDefinition) -> SourceResult<Arc<dyn StreamSource>> {
        let constructor = self
            .constructors
            .get(&definition.backend)
            .ok_or(SourceError::Unsupported(definition.backend))?;
        debug!(repo = %definition.name, backend = %definition.backend, "building stream source");
        constructor(definition, Arc::clone(&self.processors))
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.kinds())
            .field("processors", &self.processors)
            .finish()
    }
}
