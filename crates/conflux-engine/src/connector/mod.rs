//! Connectors
//!
//! A [`Connector`] is one open session to a data source or sink. Each
//! integration creates its own source and target connectors through the
//! [`ConnectorRegistry`], connects them, moves rows and disconnects. Connectors
//! are never pooled or shared between integrations.
//!
//! # Available connectors
//!
//! | Registry key | Type | Read | Write |
//! |--------------|------|------|-------|
//! | `postgres` | [`SqlConnector`] | paged SELECT | transactional INSERT |
//! | `mysql` | [`SqlConnector`] | paged SELECT | transactional INSERT |
//! | `soap` | [`SoapConnector`] | - | one envelope per batch |

mod registry;
mod soap;
mod sql;

pub use registry::{ConnectorContext, ConnectorFactory, ConnectorRegistry};
pub use soap::{SoapConnector, SoapConnectorFactory};
pub use sql::{PooledConnection, SqlConnector, SqlConnectorFactory, SqlEngine};

use async_trait::async_trait;
use conflux_rdbc::dialect::Indexer;
use conflux_rdbc::types::{Row, Value};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::operation::{SourceSpec, TargetSpec};

/// Backend family of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorKind {
    /// PostgreSQL
    Postgres,
    /// MySQL / MariaDB
    MySql,
    /// SOAP web service
    Soap,
    /// Anything registered by an embedding application
    Custom(&'static str),
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => f.write_str("postgres"),
            Self::MySql => f.write_str("mysql"),
            Self::Soap => f.write_str("soap"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// How values are bound to a write statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIndexer {
    /// `?` placeholders bound in column order
    Positional,
    /// `$1..$n` placeholders
    Numbered,
    /// Values bound by column or element name
    Named,
}

impl From<Indexer> for QueryIndexer {
    fn from(indexer: Indexer) -> Self {
        match indexer {
            Indexer::Positional => Self::Positional,
            Indexer::Numbered => Self::Numbered,
        }
    }
}

/// Prepared write target: statement text plus the columns each row carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStatement {
    /// INSERT text for SQL, operation name for SOAP
    pub text: String,
    /// Column names in value order
    pub columns: Vec<String>,
}

/// One session to a source or sink
#[async_trait]
pub trait Connector: Send + Sync {
    /// Label used in logs and errors
    fn name(&self) -> &str;

    /// Backend family
    fn kind(&self) -> ConnectorKind;

    /// Open the session; [`EngineError::AlreadyConnected`] if already open
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Close the session. Never fails and is safe when not connected.
    async fn disconnect(&mut self);

    /// Whether a session is open
    fn is_connected(&self) -> bool;

    /// Placeholder convention for [`write_statement`](Self::write_statement)
    fn query_indexer(&self) -> QueryIndexer;

    /// Build the statement that writes `columns` into `target`
    fn write_statement(&self, target: &TargetSpec, columns: &[String]) -> Result<WriteStatement>;

    /// Write `rows` as one all-or-nothing batch, returns rows written.
    ///
    /// On failure nothing of the batch is committed and the error is
    /// [`EngineError::BatchWrite`]. No retry is attempted.
    async fn execute_many(
        &mut self,
        statement: &WriteStatement,
        rows: &[Vec<Value>],
        cancel: &CancellationToken,
    ) -> Result<u64>;

    /// Remove every row from `target`
    async fn truncate(&mut self, target: &TargetSpec, _cancel: &CancellationToken) -> Result<()> {
        Err(EngineError::unsupported(format!(
            "{} connector '{}' cannot truncate {}",
            self.kind(),
            self.name(),
            target.describe()
        )))
    }

    /// Number of rows `source` yields
    async fn count(&mut self, _source: &SourceSpec, _cancel: &CancellationToken) -> Result<u64> {
        Err(EngineError::unsupported(format!(
            "{} connector '{}' cannot be used as a source",
            self.kind(),
            self.name()
        )))
    }

    /// Rows `start < n <= end` of `source`, restricted to `columns` when not empty
    async fn read_page(
        &mut self,
        _source: &SourceSpec,
        _columns: &[String],
        _start: u64,
        _end: u64,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        Err(EngineError::unsupported(format!(
            "{} connector '{}' cannot be used as a source",
            self.kind(),
            self.name()
        )))
    }
}

/// Run `future` unless `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = future => result,
    }
}
