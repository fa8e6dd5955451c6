//! Operation orchestrator
//!
//! Drives one operation through its lifecycle:
//!
//! ```text
//! Created -> Initialized -> Started -> Finished(Succeeded | Failed)
//! ```
//!
//! and publishes `INITIALIZED`, `STARTED` and exactly one terminal
//! `FINISHED`. A failure at any step, including the initializer, is reported
//! in `FINISHED` before the original error is returned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Publisher;
use crate::error::{OperationAborted, Result};
use crate::events::TaskMessage;
use crate::initializer::Initializer;
use crate::operation::Operation;
use crate::scheduler::{IntegrationOutcome, Scheduler, WorkItem};
use crate::transfer::TransferExecutor;

/// How a finished operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Every integration succeeded
    Succeeded,
    /// A fatal error stopped the operation
    Failed,
}

/// Lifecycle of one operation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Accepted, initializer not yet applied
    Created,
    /// Initializer applied
    Initialized,
    /// Integrations are running
    Started,
    /// Terminal
    Finished(OperationOutcome),
}

impl OperationState {
    /// Whether the state has no exits
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// Whether `self -> next` is a legal transition
    pub const fn can_transition_to(self, next: OperationState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Initialized)
                | (Self::Initialized, Self::Started)
                | (Self::Created, Self::Finished(OperationOutcome::Failed))
                | (Self::Started, Self::Finished(_))
        )
    }

    fn advance(&mut self, next: OperationState) {
        if !self.can_transition_to(next) {
            warn!(from = %self, to = %next, "Unexpected operation state transition");
        }
        debug!(from = %self, to = %next, "Operation state");
        *self = next;
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Initialized => f.write_str("initialized"),
            Self::Started => f.write_str("started"),
            Self::Finished(OperationOutcome::Succeeded) => f.write_str("succeeded"),
            Self::Finished(OperationOutcome::Failed) => f.write_str("failed"),
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct OperationReport {
    /// Operation name
    pub operation: String,
    /// Always `Finished(Succeeded)` for a returned report
    pub state: OperationState,
    /// Per-integration outcomes in position order
    pub integrations: Vec<IntegrationOutcome>,
    /// Rows written across all integrations
    pub rows: u64,
}

/// Runs operations with a scheduler and a transfer executor
pub struct Orchestrator {
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn TransferExecutor>,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(scheduler: Arc<dyn Scheduler>, executor: Arc<dyn TransferExecutor>) -> Self {
        Self {
            scheduler,
            executor,
        }
    }

    /// Name of the scheduler in use
    pub fn scheduler_name(&self) -> &str {
        self.scheduler.name()
    }

    /// Run `operation` to completion, publishing lifecycle events.
    ///
    /// Returns the original error of the first failure after `FINISHED`
    /// with the matching report has been published.
    pub async fn execute(
        &self,
        operation: Operation,
        initializer: Arc<dyn Initializer>,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> Result<OperationReport> {
        let name = operation.name.clone();
        let mut state = OperationState::Created;
        let submitted = Arc::new(operation);

        let operation = match initializer.initialize(submitted.as_ref().clone()) {
            Ok(operation) => Arc::new(operation),
            Err(e) => {
                warn!(operation = %name, initializer = initializer.name(), "Initializer failed: {}", e);
                state.advance(OperationState::Finished(OperationOutcome::Failed));
                let report = OperationAborted::from_error(&name, None, &e);
                publisher.publish(TaskMessage::finished(&submitted, Some(report)));
                return Err(e);
            }
        };
        state.advance(OperationState::Initialized);
        publisher.publish(TaskMessage::initialized(&operation));

        state.advance(OperationState::Started);
        info!(
            operation = %name,
            integrations = operation.integrations.len(),
            scheduler = self.scheduler.name(),
            "Operation started"
        );
        publisher.publish(TaskMessage::started(&operation));

        let items = WorkItem::list(&operation);

        let schedule = self
            .scheduler
            .schedule(items, self.executor.as_ref(), publisher, cancel)
            .await;
        let rows = schedule.rows();

        match schedule.failure {
            Some(failure) => {
                state.advance(OperationState::Finished(OperationOutcome::Failed));
                let report = OperationAborted::from_error(
                    &name,
                    Some((failure.position, failure.integration.as_str())),
                    &failure.error,
                );
                warn!(operation = %name, "Operation failed: {}", report);
                publisher.publish(TaskMessage::finished(&operation, Some(report)));
                Err(failure.error)
            }
            None => {
                state.advance(OperationState::Finished(OperationOutcome::Succeeded));
                info!(operation = %name, rows, "Operation finished");
                publisher.publish(TaskMessage::finished(&operation, None));
                Ok(OperationReport {
                    operation: name,
                    state,
                    integrations: schedule.outcomes,
                    rows,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{EventBroker, Subscriptions};
    use crate::config::{ConnectorConfig, ServerConfig, SoapConnectorConfig, SoapSettings};
    use crate::error::{EngineError, ErrorKind};
    use crate::events::EventName;
    use crate::initializer::DefaultInitializer;
    use crate::operation::{Integration, SourceSpec, TargetSpec, TransferRules};
    use crate::scheduler::SequentialScheduler;
    use crate::transfer::TransferSummary;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct FixedExecutor {
        fail: bool,
    }

    #[async_trait]
    impl TransferExecutor for FixedExecutor {
        async fn start(
            &self,
            item: &WorkItem,
            _publisher: &Publisher,
            _cancel: &CancellationToken,
        ) -> Result<TransferSummary> {
            if self.fail {
                return Err(EngineError::connection("src", "refused"));
            }
            Ok(TransferSummary {
                integration: item.integration().name.clone(),
                rows: 4,
                batches: 1,
                duration: Duration::ZERO,
            })
        }
    }

    struct RejectingInitializer;

    impl Initializer for RejectingInitializer {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn initialize(&self, _operation: Operation) -> Result<Operation> {
            Err(EngineError::config("missing parameter 'region'"))
        }
    }

    fn operation() -> Operation {
        let endpoint = ConnectorConfig::Soap(SoapConnectorConfig {
            server: ServerConfig {
                host: "erp".into(),
                port: None,
            },
            auth: None,
            ssl: false,
            soap: SoapSettings {
                wsdl: "/svc?wsdl".into(),
                endpoint: None,
                namespace: "urn:erp".into(),
                timeout_ms: 1_000,
            },
        });
        Operation::new("nightly").with_integration(Integration::new(
            "customers",
            endpoint.clone(),
            endpoint,
            TransferRules::new(
                SourceSpec::Query {
                    query: "SELECT 1".into(),
                },
                TargetSpec::Soap {
                    operation: "Import".into(),
                },
            ),
        ))
    }

    async fn execute(
        fail: bool,
        initializer: Arc<dyn Initializer>,
    ) -> (Result<OperationReport>, Vec<crate::events::TaskMessage>) {
        let subscriptions = Subscriptions::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for event in [EventName::Initialized, EventName::Started, EventName::Finished] {
            let seen = seen.clone();
            subscriptions.subscribe(event, move |m| seen.lock().push(m.clone()));
        }
        let broker = EventBroker::new(8, subscriptions);
        let orchestrator =
            Orchestrator::new(Arc::new(SequentialScheduler), Arc::new(FixedExecutor { fail }));

        let publisher = broker.publisher();
        let result = orchestrator
            .execute(operation(), initializer, &publisher, &CancellationToken::new())
            .await;
        drop(publisher);
        broker.join().await;

        let messages = seen.lock().clone();
        (result, messages)
    }

    #[tokio::test]
    async fn test_success_lifecycle() {
        let (result, messages) = execute(false, Arc::new(DefaultInitializer)).await;
        let report = result.unwrap();
        assert_eq!(report.state, OperationState::Finished(OperationOutcome::Succeeded));
        assert_eq!(report.rows, 4);

        let events: Vec<_> = messages.iter().map(|m| m.event).collect();
        assert_eq!(
            events,
            vec![EventName::Initialized, EventName::Started, EventName::Finished]
        );
        assert!(messages[2].is_success());
        assert!(messages[2].terminal);
    }

    #[tokio::test]
    async fn test_failure_reported_in_finished() {
        let (result, messages) = execute(true, Arc::new(DefaultInitializer)).await;
        let err = result.unwrap_err();
        assert!(matches!(err, EngineError::Connection { .. }));

        let finished = messages.last().unwrap();
        assert_eq!(finished.event, EventName::Finished);
        let report = finished.error.as_ref().unwrap();
        assert_eq!(report.kind, ErrorKind::Connection);
        assert_eq!(report.integration.as_deref(), Some("customers"));
        assert_eq!(report.position, Some(0));
        assert_eq!(report.message, err.to_string());
    }

    #[tokio::test]
    async fn test_initializer_failure_still_finishes() {
        let (result, messages) = execute(false, Arc::new(RejectingInitializer)).await;
        assert!(matches!(result, Err(EngineError::Configuration(_))));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, EventName::Finished);
        assert_eq!(
            messages[0].error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Configuration)
        );
    }

    #[test]
    fn test_state_machine() {
        use OperationState::*;
        assert!(Created.can_transition_to(Initialized));
        assert!(Started.can_transition_to(Finished(OperationOutcome::Failed)));
        assert!(!Finished(OperationOutcome::Succeeded).can_transition_to(Started));
        assert!(!Initialized.can_transition_to(Created));
        assert!(Finished(OperationOutcome::Failed).is_terminal());
        assert_eq!(Finished(OperationOutcome::Succeeded).to_string(), "succeeded");
    }
}
