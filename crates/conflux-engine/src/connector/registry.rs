//! Connector registry
//!
//! Maps the registry key of a [`ConnectorConfig`] (`postgres`, `mysql`,
//! `soap`) to the factory that builds connectors for it. Embedding
//! applications and tests register their own factories under the same keys
//! to substitute backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use conflux_rdbc::connection::ConnectionFactory;

use super::soap::SoapConnectorFactory;
use super::sql::SqlConnectorFactory;
use super::Connector;
use crate::config::ConnectorConfig;
use crate::error::{EngineError, Result};

/// Settings shared by every connector created for a run
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    /// Label for logs and errors, e.g. `orders/source`
    pub label: String,
    /// Timeout for opening a session
    pub connect_timeout: Duration,
}

impl ConnectorContext {
    /// Context with the given label
    pub fn new(label: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            connect_timeout,
        }
    }
}

/// Builds connectors for one registry key
pub trait ConnectorFactory: Send + Sync {
    /// Create an unconnected connector
    fn create(
        &self,
        config: &ConnectorConfig,
        context: &ConnectorContext,
    ) -> Result<Box<dyn Connector>>;
}

/// Registry of connector factories
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, Arc<dyn ConnectorFactory>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &self.list())
            .finish()
    }
}

impl ConnectorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in PostgreSQL, MySQL and SOAP connectors
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "postgres",
            Arc::new(SqlConnectorFactory::new(Arc::new(
                conflux_rdbc::postgres::PgConnectionFactory,
            ))),
        );
        registry.register(
            "mysql",
            Arc::new(SqlConnectorFactory::new(Arc::new(
                conflux_rdbc::mysql::MySqlConnectionFactory,
            ))),
        );
        registry.register("soap", Arc::new(SoapConnectorFactory));
        registry
    }

    /// Register a factory, replacing any previous one under `key`
    pub fn register(&mut self, key: impl Into<String>, factory: Arc<dyn ConnectorFactory>) {
        self.factories.insert(key.into(), factory);
    }

    /// Register a SQL connection factory under its database scheme
    pub fn register_sql(&mut self, factory: Arc<dyn ConnectionFactory>) {
        let key = factory.database_type().scheme();
        self.register(key, Arc::new(SqlConnectorFactory::new(factory)));
    }

    /// Get a factory by key
    pub fn get(&self, key: &str) -> Option<&Arc<dyn ConnectorFactory>> {
        self.factories.get(key)
    }

    /// Registered keys, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut keys: Vec<_> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Create a connector for `config`
    pub fn create(
        &self,
        config: &ConnectorConfig,
        context: &ConnectorContext,
    ) -> Result<Box<dyn Connector>> {
        let key = config.connector_type();
        let factory = self.get(key).ok_or_else(|| {
            EngineError::config(format!(
                "no connector registered for '{}' (available: {})",
                key,
                self.list().join(", ")
            ))
        })?;
        factory.create(config, context)
    }
}
