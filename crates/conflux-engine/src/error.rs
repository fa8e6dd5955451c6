//! Error types for conflux-engine
//!
//! [`EngineError`] is what every engine operation returns. [`OperationAborted`]
//! is a cloneable report of the first fatal error, carried by the terminal
//! `FINISHED` event so subscribers see the same kind and message that `run()`
//! returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for conflux-engine
pub type Result<T> = std::result::Result<T, EngineError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid or missing configuration
    Configuration,
    /// Could not open a session to a backend
    Connection,
    /// A batch write failed and was not committed
    BatchWrite,
    /// The operation definition is unusable
    InvalidOperation,
    /// More than one initializer is registered and none was selected
    InitializerAmbiguity,
    /// An operation stopped at a fatal error
    OperationAborted,
    /// `connect()` called on an open connector
    AlreadyConnected,
    /// I/O attempted on a closed connector
    NotConnected,
    /// The run was cancelled
    Cancelled,
    /// Error raised by the relational layer
    Database,
    /// Row movement failed outside of a connector call
    Transfer,
    /// The connector does not support the requested capability
    Unsupported,
}

impl ErrorKind {
    /// Stable snake_case name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::BatchWrite => "batch_write",
            Self::InvalidOperation => "invalid_operation",
            Self::InitializerAmbiguity => "initializer_ambiguity",
            Self::OperationAborted => "operation_aborted",
            Self::AlreadyConnected => "already_connected",
            Self::NotConnected => "not_connected",
            Self::Cancelled => "cancelled",
            Self::Database => "database",
            Self::Transfer => "transfer",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report of the error that stopped an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("operation '{operation}' aborted{}: {kind}: {message}", at_integration(.integration, .position))]
pub struct OperationAborted {
    /// Operation name
    pub operation: String,
    /// Integration that failed, `None` when the failure happened before any
    /// integration started
    pub integration: Option<String>,
    /// 0-based position of the failed integration
    pub position: Option<usize>,
    /// Kind of the original error
    pub kind: ErrorKind,
    /// Display text of the original error
    pub message: String,
}

fn at_integration(integration: &Option<String>, position: &Option<usize>) -> String {
    match (integration, position) {
        (Some(name), Some(pos)) => format!(" at integration '{}' (#{})", name, pos),
        (Some(name), None) => format!(" at integration '{}'", name),
        _ => String::new(),
    }
}

impl OperationAborted {
    /// Build a report from the original error
    pub fn from_error(
        operation: impl Into<String>,
        integration: Option<(usize, &str)>,
        error: &EngineError,
    ) -> Self {
        Self {
            operation: operation.into(),
            integration: integration.map(|(_, name)| name.to_string()),
            position: integration.map(|(pos, _)| pos),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Main error type for conflux-engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection to a backend failed
    #[error("connection error on '{connector}': {message}")]
    Connection {
        connector: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Batch write failed, nothing of the batch was committed
    #[error("batch write of {rows} rows failed on '{connector}': {message}")]
    BatchWrite {
        connector: String,
        rows: usize,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Operation definition rejected before execution
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Several initializers registered and no selection made
    #[error("ambiguous initializer, candidates: {}", candidates.join(", "))]
    InitializerAmbiguity { candidates: Vec<String> },

    /// Operation aborted at a fatal error
    #[error(transparent)]
    OperationAborted(#[from] OperationAborted),

    /// Connector already has an open session
    #[error("connector '{0}' is already connected")]
    AlreadyConnected(String),

    /// Connector has no open session
    #[error("connector '{0}' is not connected")]
    NotConnected(String),

    /// Cancelled through the run's cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Relational layer error
    #[error(transparent)]
    Database(#[from] conflux_rdbc::Error),

    /// Transfer error
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Capability not offered by a connector
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl EngineError {
    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::BatchWrite { .. } => ErrorKind::BatchWrite,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::InitializerAmbiguity { .. } => ErrorKind::InitializerAmbiguity,
            Self::OperationAborted(_) => ErrorKind::OperationAborted,
            Self::AlreadyConnected(_) => ErrorKind::AlreadyConnected,
            Self::NotConnected(_) => ErrorKind::NotConnected,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Database(_) => ErrorKind::Database,
            Self::Transfer(_) => ErrorKind::Transfer,
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Create a transfer error
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer(message.into())
    }

    /// Create an unsupported error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a connection error
    pub fn connection(connector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            connector: connector.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping its cause
    pub fn connection_with_source(
        connector: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            connector: connector.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a batch write error
    pub fn batch_write(
        connector: impl Into<String>,
        rows: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::BatchWrite {
            connector: connector.into(),
            rows,
            message: message.into(),
            source: None,
        }
    }

    /// Create a batch write error wrapping its cause
    pub fn batch_write_with_source(
        connector: impl Into<String>,
        rows: usize,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BatchWrite {
            connector: connector.into(),
            rows,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the error came from cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
