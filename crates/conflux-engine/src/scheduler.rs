//! Scheduling of integrations
//!
//! An operation's integrations become a list of [`WorkItem`]s tagged with
//! their position. A [`Scheduler`] decides how the list is executed; the
//! default [`SequentialScheduler`] runs one item at a time and stops at the
//! first fatal error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

use crate::broker::Publisher;
use crate::error::EngineError;
use crate::events::TaskMessage;
use crate::operation::{Integration, Operation};
use crate::telemetry::integration_span;
use crate::transfer::{TransferExecutor, TransferSummary};

/// One integration of an operation, tagged with its position.
///
/// Items share the read-only operation instead of copying integrations out
/// of it.
#[derive(Debug, Clone)]
pub struct WorkItem {
    position: usize,
    operation: Arc<Operation>,
}

impl WorkItem {
    /// One item per integration of `operation`, in declared order
    pub fn list(operation: &Arc<Operation>) -> Vec<WorkItem> {
        (0..operation.integrations.len())
            .map(|position| WorkItem {
                position,
                operation: operation.clone(),
            })
            .collect()
    }

    /// Zero-based position in the operation
    pub fn position(&self) -> usize {
        self.position
    }

    /// The owning operation
    pub fn operation(&self) -> &Arc<Operation> {
        &self.operation
    }

    /// Name of the owning operation
    pub fn operation_name(&self) -> &str {
        &self.operation.name
    }

    /// The integration to run
    pub fn integration(&self) -> &Integration {
        // `list` only creates positions inside the operation
        &self.operation.integrations[self.position]
    }
}

/// Lifecycle of one integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationState {
    /// Waiting for its turn
    Pending,
    /// Transfer in progress
    Running,
    /// Transfer completed
    Succeeded,
    /// Transfer raised a fatal error
    Failed,
    /// Never started because an earlier item failed or the run was cancelled
    Skipped,
}

impl IntegrationState {
    /// Whether the state has no exits
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Whether `self -> next` is a legal transition
    pub const fn can_transition_to(self, next: IntegrationState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for IntegrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Final state of one integration
#[derive(Debug, Clone)]
pub struct IntegrationOutcome {
    /// Position in the operation
    pub position: usize,
    /// Integration name
    pub integration: String,
    /// Final state
    pub state: IntegrationState,
    /// Present when the transfer completed
    pub summary: Option<TransferSummary>,
}

/// The first fatal error of a schedule
#[derive(Debug)]
pub struct IntegrationFailure {
    /// Position of the failed item
    pub position: usize,
    /// Name of the failed item
    pub integration: String,
    /// The original error
    pub error: EngineError,
}

/// What a scheduler did with a work list
#[derive(Debug, Default)]
pub struct ScheduleReport {
    /// One entry per work item, in position order
    pub outcomes: Vec<IntegrationOutcome>,
    /// Set when the schedule stopped early
    pub failure: Option<IntegrationFailure>,
}

impl ScheduleReport {
    /// Number of items that were started
    pub fn attempted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, IntegrationState::Succeeded | IntegrationState::Failed))
            .count()
    }

    /// Rows written across all succeeded items
    pub fn rows(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.summary.as_ref())
            .map(|s| s.rows)
            .sum()
    }
}

/// Executes a work list
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Scheduler name for logs
    fn name(&self) -> &str;

    /// Run `items`, reporting per-integration progress through `publisher`
    async fn schedule(
        &self,
        items: Vec<WorkItem>,
        executor: &dyn TransferExecutor,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> ScheduleReport;
}

/// Runs items one after another in position order
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialScheduler;

impl SequentialScheduler {
    fn skipped(item: &WorkItem) -> IntegrationOutcome {
        IntegrationOutcome {
            position: item.position(),
            integration: item.integration().name.clone(),
            state: IntegrationState::Skipped,
            summary: None,
        }
    }
}

#[async_trait]
impl Scheduler for SequentialScheduler {
    fn name(&self) -> &str {
        "sequential"
    }

    async fn schedule(
        &self,
        mut items: Vec<WorkItem>,
        executor: &dyn TransferExecutor,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> ScheduleReport {
        items.sort_by_key(WorkItem::position);
        let mut report = ScheduleReport::default();

        for item in &items {
            if report.failure.is_some() {
                report.outcomes.push(Self::skipped(item));
                continue;
            }
            if cancel.is_cancelled() {
                info!(integration = %item.integration().name, "Cancelled before start");
                report.outcomes.push(Self::skipped(item));
                report.failure = Some(IntegrationFailure {
                    position: item.position(),
                    integration: item.integration().name.clone(),
                    error: EngineError::Cancelled,
                });
                continue;
            }

            let name = item.integration().name.as_str();
            publisher.publish(TaskMessage::integration_started(item.operation_name(), name));

            let result = executor
                .start(item, publisher, cancel)
                .instrument(integration_span(item.operation_name(), name, item.position()))
                .await;

            match result {
                Ok(summary) => {
                    publisher.publish(TaskMessage::integration_finished(
                        item.operation_name(),
                        name,
                        summary.rows,
                    ));
                    report.outcomes.push(IntegrationOutcome {
                        position: item.position(),
                        integration: name.to_string(),
                        state: IntegrationState::Succeeded,
                        summary: Some(summary),
                    });
                }
                Err(e) => {
                    error!(
                        operation = %item.operation_name(),
                        integration = %name,
                        position = item.position(),
                        "Integration failed: {}",
                        e
                    );
                    report.outcomes.push(IntegrationOutcome {
                        position: item.position(),
                        integration: name.to_string(),
                        state: IntegrationState::Failed,
                        summary: None,
                    });
                    report.failure = Some(IntegrationFailure {
                        position: item.position(),
                        integration: name.to_string(),
                        error: e,
                    });
                }
            }
        }

        report
    }
}
