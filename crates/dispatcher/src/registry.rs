//! Output registry - maps a sink type name to the factory that builds it

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use contracts::SinkConfig;
use observability::Scorekeeper;

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::sinks::{FileSinkFactory, PgConnector, PgSinkFactory};

/// Builds a running sink from its configuration
#[async_trait]
pub trait OutputFactory: Send + Sync {
    /// Registry key (`file`, `pg`, ...)
    fn name(&self) -> &'static str;

    /// Validate `config`, open the sink and spawn its worker
    async fn create(&self, config: &SinkConfig) -> Result<SinkHandle, DispatcherError>;

    /// Describe the metrics this sink type emits
    fn bind_scorekeeper(&self, _keeper: &Scorekeeper) {}
}

/// Registry of sink factories
#[derive(Default, Clone)]
pub struct OutputRegistry {
    factories: BTreeMap<&'static str, Arc<dyn OutputFactory>>,
}

impl OutputRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `file` and `pg` sinks
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(FileSinkFactory);
        registry.register(PgSinkFactory::new(PgConnector));
        registry
    }

    /// Add a factory, replacing any factory with the same name
    pub fn register<F: OutputFactory + 'static>(&mut self, factory: F) {
        debug!(sink_type = factory.name(), "Output factory registered");
        self.factories.insert(factory.name(), Arc::new(factory));
    }

    pub fn get(&self, sink_type: &str) -> Option<&Arc<dyn OutputFactory>> {
        self.factories.get(sink_type)
    }

    /// Registered sink type names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Create the sink described by `config`
    ///
    /// # Errors
    /// `UnknownSinkType` if no factory is registered for `config.sink_type`,
    /// otherwise whatever the factory reports.
    #[instrument(
        name = "registry_create",
        skip(self, config),
        fields(sink = %config.name, sink_type = %config.sink_type)
    )]
    pub async fn create(&self, config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
        let factory = self
            .get(&config.sink_type)
            .ok_or_else(|| DispatcherError::UnknownSinkType {
                name: config.name.clone(),
                sink_type: config.sink_type.clone(),
            })?;
        factory.create(config).await
    }

    /// Let every factory describe its metrics
    pub fn bind_scorekeeper(&self, keeper: &Scorekeeper) {
        for factory in self.factories.values() {
            factory.bind_scorekeeper(keeper);
        }
    }
}
