//! Everything a job needs, bundled once at startup.
//!
//! A [`JobContext`] replaces process-wide singletons: the configuration, the
//! catalog, the transform registry, the raster source, the assembler, the
//! publisher and (optionally) the queues are constructed by the caller and
//! shared by every task through `Arc`s. Nothing in it is mutated after
//! construction.

use std::sync::Arc;

use eoforge_core::Configuration;

use crate::assembler::{AssemblerFactory, Eo3Assembler};
use crate::catalog::Catalog;
use crate::dispatch::QueueProvider;
use crate::error::{Error, Result};
use crate::invoker::TransformInvoker;
use crate::locator::DatasetLocator;
use crate::mediator::QueueMediator;
use crate::publish::{PublishOptions, Publisher};
use crate::source::{GeoTiffSource, RasterSource};
use crate::transform::TransformRegistry;

/// Shared collaborators of one job.
#[derive(Clone)]
pub struct JobContext {
    config: Arc<Configuration>,
    catalog: Arc<dyn Catalog>,
    registry: Arc<TransformRegistry>,
    source: Arc<dyn RasterSource>,
    assembler: Arc<dyn AssemblerFactory>,
    publisher: Publisher,
    queues: Option<Arc<dyn QueueProvider>>,
    topic: Option<String>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("transform", &self.config.specification.transform)
            .field("registry", &self.registry)
            .field("publisher", &self.publisher)
            .field("queues", &self.queues.is_some())
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    /// A context with the built-in transforms, GeoTIFF source, EO3 assembler
    /// and a local-only publisher.
    #[must_use]
    pub fn new(config: Arc<Configuration>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            config,
            catalog,
            registry: Arc::new(TransformRegistry::with_builtins()),
            source: Arc::new(GeoTiffSource::new()),
            assembler: Arc::new(Eo3Assembler),
            publisher: Publisher::new(),
            queues: None,
            topic: None,
        }
    }

    /// Replaces the transform registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<TransformRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the raster source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn RasterSource>) -> Self {
        self.source = source;
        self
    }

    /// Replaces the assembler.
    #[must_use]
    pub fn with_assembler(mut self, assembler: Arc<dyn AssemblerFactory>) -> Self {
        self.assembler = assembler;
        self
    }

    /// Replaces the publisher.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Sets the queues used by queue commands.
    #[must_use]
    pub fn with_queues(mut self, queues: Arc<dyn QueueProvider>) -> Self {
        self.queues = Some(queues);
        self
    }

    /// Notifies `topic` about every published output.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// The job configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// The catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// The transform registry.
    #[must_use]
    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// The assembler factory.
    #[must_use]
    pub fn assembler(&self) -> &Arc<dyn AssemblerFactory> {
        &self.assembler
    }

    /// The publisher.
    #[must_use]
    pub const fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// A locator over this job's products.
    #[must_use]
    pub fn locator(&self) -> DatasetLocator {
        DatasetLocator::new(Arc::clone(&self.catalog), Arc::clone(&self.config))
    }

    /// An invoker over this job's registry and source.
    #[must_use]
    pub fn invoker(&self) -> TransformInvoker {
        TransformInvoker::new(Arc::clone(&self.registry), Arc::clone(&self.source))
    }

    /// A queue mediator for this job.
    #[must_use]
    pub fn mediator(&self) -> QueueMediator {
        QueueMediator::new(self.locator())
    }

    /// The queues.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no queue provider was set.
    pub fn queues(&self) -> Result<&dyn QueueProvider> {
        self.queues
            .as_deref()
            .ok_or_else(|| Error::configuration("no work queue service is configured"))
    }

    /// Publishing options derived from the configuration.
    #[must_use]
    pub fn publish_options(&self, dry_run: bool) -> PublishOptions {
        PublishOptions {
            dry_run,
            write_stac: self.config.output.write_stac,
            explorer_url: self.config.output.explorer_url.clone(),
            topic: self.topic.clone(),
        }
    }
}
