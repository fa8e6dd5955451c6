//! Lifecycle and progress events
//!
//! Every message the orchestrator publishes is a [`TaskMessage`]. The
//! lifecycle events `INITIALIZED`, `STARTED` and `FINISHED` are published
//! exactly once per run and carry the operation as the initializer left it;
//! `FINISHED` is the only terminal message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{EngineError, OperationAborted};
use crate::operation::Operation;

/// Event names subscribers can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    /// The initializer has produced the final operation
    Initialized,
    /// Integrations are about to run
    Started,
    /// The run is over, successfully or not
    Finished,
    /// One integration is starting
    IntegrationStarted,
    /// One integration completed successfully
    IntegrationFinished,
    /// Progress message
    Log,
}

impl EventName {
    /// Every event name
    pub const ALL: [EventName; 6] = [
        Self::Initialized,
        Self::Started,
        Self::Finished,
        Self::IntegrationStarted,
        Self::IntegrationFinished,
        Self::Log,
    ];

    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Started => "STARTED",
            Self::Finished => "FINISHED",
            Self::IntegrationStarted => "INTEGRATION_STARTED",
            Self::IntegrationFinished => "INTEGRATION_FINISHED",
            Self::Log => "LOG",
        }
    }

    /// Whether this is one of the three per-run lifecycle events
    pub const fn is_lifecycle(self) -> bool {
        matches!(self, Self::Initialized | Self::Started | Self::Finished)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| EngineError::config(format!("unknown event '{}'", s)))
    }
}

/// Event body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    /// Operation name
    pub operation: String,
    /// The operation being run, on lifecycle events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Arc<Operation>>,
    /// Integration the event belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Rows moved so far (LOG) or in total (INTEGRATION_FINISHED)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

/// Message delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Event name
    pub event: EventName,
    /// Event body
    pub payload: EventPayload,
    /// Last message of the run
    pub terminal: bool,
    /// First fatal error, only on a failed `FINISHED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationAborted>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl TaskMessage {
    /// Non-terminal message without error
    pub fn new(event: EventName, payload: EventPayload) -> Self {
        Self {
            event,
            payload,
            terminal: false,
            error: None,
            timestamp: Utc::now(),
        }
    }

    fn for_operation(event: EventName, operation: &str) -> Self {
        Self::new(
            event,
            EventPayload {
                operation: operation.to_string(),
                ..Default::default()
            },
        )
    }

    fn lifecycle(event: EventName, operation: &Arc<Operation>) -> Self {
        let mut message = Self::for_operation(event, &operation.name);
        message.payload.definition = Some(operation.clone());
        message
    }

    /// `INITIALIZED` with the initialized operation
    pub fn initialized(operation: &Arc<Operation>) -> Self {
        Self::lifecycle(EventName::Initialized, operation)
    }

    /// `STARTED`
    pub fn started(operation: &Arc<Operation>) -> Self {
        Self::lifecycle(EventName::Started, operation)
    }

    /// Terminal `FINISHED`, carrying the error on failure
    pub fn finished(operation: &Arc<Operation>, error: Option<OperationAborted>) -> Self {
        let mut message = Self::lifecycle(EventName::Finished, operation);
        message.terminal = true;
        message.payload.message = error.as_ref().map(|e| e.message.clone());
        message.error = error;
        message
    }

    /// `INTEGRATION_STARTED`
    pub fn integration_started(operation: &str, integration: &str) -> Self {
        let mut message = Self::for_operation(EventName::IntegrationStarted, operation);
        message.payload.integration = Some(integration.to_string());
        message
    }

    /// `INTEGRATION_FINISHED` with the number of rows written
    pub fn integration_finished(operation: &str, integration: &str, rows: u64) -> Self {
        let mut message = Self::for_operation(EventName::IntegrationFinished, operation);
        message.payload.integration = Some(integration.to_string());
        message.payload.row_count = Some(rows);
        message
    }

    /// `LOG` progress line
    pub fn log(
        operation: &str,
        integration: &str,
        text: impl Into<String>,
        rows: Option<u64>,
    ) -> Self {
        let mut message = Self::for_operation(EventName::Log, operation);
        message.payload.integration = Some(integration.to_string());
        message.payload.message = Some(text.into());
        message.payload.row_count = rows;
        message
    }

    /// `FINISHED` without error
    pub fn is_success(&self) -> bool {
        self.event == EventName::Finished && self.error.is_none()
    }
}
