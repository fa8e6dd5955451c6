//! Engine façade
//!
//! [`Engine`] is the entry point for embedding applications. It owns the
//! connector and initializer registries and a subscription table that
//! outlives individual runs. Each [`run`](Engine::run) gets a fresh event
//! broker bound to that table, which is drained before `run` returns, so
//! every callback for a run has fired by the time the caller sees the result.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use crate::broker::{EventBroker, SubscriptionId, Subscriptions};
use crate::config::EngineConfig;
use crate::connector::ConnectorRegistry;
use crate::error::Result;
use crate::events::{EventName, TaskMessage};
use crate::initializer::{Initializer, InitializerRegistry};
use crate::operation::Operation;
use crate::orchestrator::{OperationReport, Orchestrator};
use crate::scheduler::{Scheduler, SequentialScheduler};
use crate::telemetry::operation_span;
use crate::transfer::{PagedTransferExecutor, TransferExecutor};

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    connectors: Option<ConnectorRegistry>,
    initializers: InitializerRegistry,
    scheduler: Option<Arc<dyn Scheduler>>,
    executor: Option<Arc<dyn TransferExecutor>>,
}

impl EngineBuilder {
    /// Engine settings
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Connector registry; defaults to [`ConnectorRegistry::with_defaults`]
    pub fn connectors(mut self, connectors: ConnectorRegistry) -> Self {
        self.connectors = Some(connectors);
        self
    }

    /// Replace the initializer registry
    pub fn initializers(mut self, initializers: InitializerRegistry) -> Self {
        self.initializers = initializers;
        self
    }

    /// Register one initializer under its own name
    pub fn initializer(mut self, initializer: Arc<dyn Initializer>) -> Self {
        self.initializers = self.initializers.with(initializer);
        self
    }

    /// Scheduler; defaults to [`SequentialScheduler`]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Transfer executor; defaults to [`PagedTransferExecutor`] over the
    /// connector registry
    pub fn executor(mut self, executor: Arc<dyn TransferExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> Result<Engine> {
        self.config.check()?;

        let connectors = Arc::new(self.connectors.unwrap_or_else(ConnectorRegistry::with_defaults));
        let executor = self.executor.unwrap_or_else(|| -> Arc<dyn TransferExecutor> {
            Arc::new(
                PagedTransferExecutor::new(
                    connectors.clone(),
                    self.config.connect_timeout(),
                    self.config.default_batch_size,
                )
                .with_page_timeout(self.config.page_timeout()),
            )
        });
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| -> Arc<dyn Scheduler> { Arc::new(SequentialScheduler) });

        debug!(
            connectors = ?connectors.list(),
            initializers = ?self.initializers.names(),
            scheduler = scheduler.name(),
            "Engine built"
        );

        Ok(Engine {
            config: self.config,
            connectors,
            initializers: self.initializers,
            orchestrator: Orchestrator::new(scheduler, executor),
            subscriptions: Subscriptions::new(),
        })
    }
}

/// Runs operations and fans their lifecycle events out to subscribers
pub struct Engine {
    config: EngineConfig,
    connectors: Arc<ConnectorRegistry>,
    initializers: InitializerRegistry,
    orchestrator: Orchestrator,
    subscriptions: Subscriptions,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("connectors", &self.connectors.list())
            .field("initializers", &self.initializers.names())
            .field("scheduler", &self.orchestrator.scheduler_name())
            .finish()
    }
}

impl Engine {
    /// Start building an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine with default registries
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Engine settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connector registry in use
    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Register `callback` for `event`; applies to this and later runs
    pub fn subscribe<F>(&self, event: EventName, callback: F) -> SubscriptionId
    where
        F: Fn(&TaskMessage) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(event, callback)
    }

    /// Remove a callback registered with [`subscribe`](Self::subscribe)
    pub fn unsubscribe(&self, event: EventName, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(event, id)
    }

    /// Number of callbacks registered for `event`
    pub fn subscriber_count(&self, event: EventName) -> usize {
        self.subscriptions.count(event)
    }

    /// Run `operation` to completion
    pub async fn run(&self, operation: Operation) -> Result<OperationReport> {
        self.run_with_cancel(operation, CancellationToken::new()).await
    }

    /// Run `operation`, stopping early when `cancel` fires.
    ///
    /// Validation and initializer resolution happen before any event is
    /// published. After that exactly one `FINISHED` is delivered, and every
    /// callback has run before this returns.
    pub async fn run_with_cancel(
        &self,
        operation: Operation,
        cancel: CancellationToken,
    ) -> Result<OperationReport> {
        operation.validate_operation()?;
        let initializer = self.initializers.get(self.config.initializer.as_deref())?;

        let span = operation_span(&operation.name, operation.integrations.len());
        let broker = EventBroker::new(self.config.channel_capacity, self.subscriptions.clone());
        let publisher = broker.publisher();

        let result = self
            .orchestrator
            .execute(operation, initializer, &publisher, &cancel)
            .instrument(span)
            .await;

        drop(publisher);
        let delivered = broker.join().await;
        debug!(delivered, "Run complete");
        result
    }
}
