//! # Database Context
//!
//! Explicit context created once at startup and passed by reference to
//! every operation. Owns the configuration, the schema registry and the
//! dispatcher with its two pools. Torn down with [`Database::close`].

use std::sync::Arc;

use tracing::info;

use super::collection::Collection;
use crate::core::{ClientConfig, DbResult, HookRegistry, QueryHook};
use crate::dispatch::{Connector, Dispatcher, PoolStats};
use crate::schema::SchemaRegistry;

/// Database handle
pub struct Database {
    config: ClientConfig,
    registry: SchemaRegistry,
    dispatcher: Dispatcher,
}

impl Database {
    /// Validate the configuration and build both pools
    ///
    /// Connections are opened lazily on first use.
    pub fn new(
        config: ClientConfig,
        registry: SchemaRegistry,
        connector: Arc<dyn Connector>,
    ) -> DbResult<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(connector, &config, HookRegistry::new());

        info!(
            database = %config.database,
            pool_size = config.pool.max_size,
            schemas = registry.len(),
            "database context initialized"
        );

        Ok(Self {
            config,
            registry,
            dispatcher,
        })
    }

    /// Register a query hook; hooks run in registration order
    pub fn with_hook(mut self, hook: impl QueryHook + 'static) -> Self {
        self.dispatcher.hooks_mut().register(hook);
        self
    }

    /// Handle to a collection; picks up its schema if one is registered
    pub fn collection(&self, name: &str) -> Collection<'_> {
        Collection::new(self, name, self.registry.get(name))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Pool counters as (async, blocking)
    pub fn pool_stats(&self) -> (PoolStats, PoolStats) {
        self.dispatcher.pool_stats()
    }

    /// Close both pools; later operations fail with a connection error
    pub fn close(&self) {
        self.dispatcher.close();
        info!(database = %self.config.database, "database context closed");
    }
}
