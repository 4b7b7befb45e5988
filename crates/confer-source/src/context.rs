use std::sync::Arc;

use confer_format::ProcessorSelector;
use confer_types::{BackendKind, LocationBuilder, RepositoryDefinition, TypeError};

use crate::error::SourceResult;
use crate::lifecycle::ClientSlot;

/// State every source carries: its definition, resolver, processors and
/// client slot.
#[derive(Debug)]
pub struct SourceContext<C: ?Sized> {
    definition: RepositoryDefinition,
    locations: LocationBuilder,
    processors: Arc<ProcessorSelector>,
    client: ClientSlot<C>,
}

impl<C: ?Sized> SourceContext<C> {
    /// Validate `definition` for a backend of kind `expected`.
    pub fn new(definition: RepositoryDefinition, expected: BackendKind) -> SourceResult<Self> {
        definition.validate()?;
        if definition.backend != expected {
            return Err(TypeError::InvalidDefinition {
                name: definition.name.clone(),
                reason: format!(
                    "backend {} cannot be served by a {expected} source",
                    definition.backend
                ),
            }
            .into());
        }
        let locations = definition.location_builder()?;
        let client = ClientSlot::new(definition.name.clone());
        Ok(Self {
            definition,
            locations,
            processors: Arc::new(ProcessorSelector::standard()),
            client,
        })
    }

    /// Share a selector with other sources.
    pub fn with_processors(mut self, processors: Arc<ProcessorSelector>) -> Self {
        self.processors = processors;
        self
    }

    pub fn definition(&self) -> &RepositoryDefinition {
        &self.definition
    }

    pub fn locations(&self) -> &LocationBuilder {
        &self.locations
    }

    pub fn processors(&self) -> &ProcessorSelector {
        &self.processors
    }

    pub fn client(&self) -> &ClientSlot<C> {
        &self.client
    }
}
