//! Relational connector
//!
//! Reads with the dialect's paging query and writes each batch inside one
//! transaction. A failed batch is rolled back and the session closed before
//! the error is returned.
//!
//! Table sources are paged in primary key order, falling back to the
//! selected columns (or every column) for tables without a key. Free-form
//! query sources are paged in the order the query itself defines.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conflux_rdbc::connection::{Connection, ConnectionConfig, ConnectionFactory};
use conflux_rdbc::dialect::{dialect_for_type, SqlDialect, COUNT_COLUMN, PAGING_ROW_NUMBER_COLUMN};
use conflux_rdbc::schema::{SchemaInspector, SortedTable};
use conflux_rdbc::types::{Row, TableMetadata, Value};

use super::registry::{ConnectorContext, ConnectorFactory};
use super::{cancellable, Connector, ConnectorKind, QueryIndexer, WriteStatement};
use crate::config::{ConnectorConfig, SensitiveString, SqlConnectorConfig, SqlVendor};
use crate::error::{EngineError, Result};
use crate::operation::{SourceSpec, TargetSpec};

/// Connector for PostgreSQL and MySQL
pub struct SqlConnector {
    label: String,
    config: SqlConnectorConfig,
    dialect: Arc<dyn SqlDialect>,
    factory: Arc<dyn ConnectionFactory>,
    connection: ConnectionConfig,
    permits: Arc<Semaphore>,
    conn: Option<Box<dyn Connection>>,
    page_order: Option<(SourceSpec, Vec<String>)>,
}

impl std::fmt::Debug for SqlConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlConnector")
            .field("label", &self.label)
            .field("endpoint", &self.config.endpoint())
            .field("dialect", &self.dialect.name())
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl SqlConnector {
    /// Create an unconnected connector
    pub fn new(
        label: impl Into<String>,
        config: SqlConnectorConfig,
        factory: Arc<dyn ConnectionFactory>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let url = config.url()?;
        let connection = ConnectionConfig::new(url.as_str())
            .with_connect_timeout(connect_timeout.as_millis() as u64)
            .with_query_timeout(config.query_timeout_ms)
            .with_tls(config.ssl);
        let permits = Arc::new(Semaphore::new(config.max_connections as usize));

        Ok(Self {
            label: label.into(),
            dialect: dialect_for_type(config.vendor.database_type()),
            config,
            factory,
            connection,
            permits,
            conn: None,
            page_order: None,
        })
    }

    /// Dialect used for query text
    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    /// Connector configuration
    pub fn config(&self) -> &SqlConnectorConfig {
        &self.config
    }

    /// Handle that opens additional sessions to the same database, at most
    /// `max_connections` at a time
    pub fn engine(&self) -> SqlEngine {
        SqlEngine {
            label: self.label.clone(),
            factory: self.factory.clone(),
            connection: self.connection.clone(),
            permits: self.permits.clone(),
            max_connections: self.config.max_connections,
        }
    }

    /// Driver URL including credentials
    pub fn engine_url(&self) -> SensitiveString {
        SensitiveString::new(self.connection.url.clone())
    }

    /// Tables of `schema` ordered so referenced tables come first
    pub async fn sorted_table_and_foreign_key_names(
        &self,
        schema: &str,
    ) -> Result<Vec<SortedTable>> {
        let conn = self.session()?;
        let inspector = SchemaInspector::new(conn, self.dialect.clone());
        Ok(inspector.sorted_table_and_foreign_key_names(schema).await?)
    }

    fn session(&self) -> Result<&dyn Connection> {
        self.conn
            .as_deref()
            .ok_or_else(|| EngineError::NotConnected(self.label.clone()))
    }

    fn source_query(&self, source: &SourceSpec, columns: &[String]) -> Result<String> {
        match source {
            SourceSpec::Table { schema, table } => {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                Ok(self
                    .dialect
                    .prepare_select_query(schema.as_deref(), table, &columns)?)
            }
            // Mapping picks columns by name from whatever the query returns
            SourceSpec::Query { query } => Ok(query.clone()),
        }
    }

    /// Columns that give `source` a stable row order, looked up once per source
    async fn page_order(
        &mut self,
        source: &SourceSpec,
        columns: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let SourceSpec::Table { schema, table } = source else {
            return Ok(Vec::new());
        };
        if let Some((cached, order)) = &self.page_order {
            if cached == source {
                return Ok(order.clone());
            }
        }

        let schema = schema
            .clone()
            .or_else(|| self.dialect.default_schema().map(str::to_string))
            .unwrap_or_else(|| self.config.database.clone());
        let meta = {
            let inspector = SchemaInspector::new(self.session()?, self.dialect.clone());
            cancellable(cancel, async {
                inspector.table(&schema, table).await.map_err(EngineError::from)
            })
            .await?
        };

        let order = stable_order(meta.as_ref(), columns);
        if order.is_empty() {
            warn!(
                connector = %self.label,
                table = %table,
                "No columns to order pages by, pages may overlap"
            );
        } else {
            debug!(connector = %self.label, table = %table, order = ?order, "Paging order");
        }
        self.page_order = Some((source.clone(), order.clone()));
        Ok(order)
    }

    fn target_table<'a>(&self, target: &'a TargetSpec) -> Result<(Option<&'a str>, &'a str)> {
        match target {
            TargetSpec::Table { schema, table } => Ok((schema.as_deref(), table.as_str())),
            TargetSpec::Soap { operation } => Err(EngineError::config(format!(
                "SQL connector '{}' cannot write to SOAP operation '{}'",
                self.label, operation
            ))),
        }
    }
}

async fn write_batch(
    conn: &dyn Connection,
    sql: &str,
    rows: &[Vec<Value>],
) -> conflux_rdbc::Result<u64> {
    let tx = conn.begin().await?;
    match tx.execute_many(sql, rows).await {
        Ok(affected) => {
            tx.commit().await?;
            Ok(affected)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback after failed batch also failed: {}", rollback);
            }
            Err(e)
        }
    }
}

/// Primary key when it is part of the selection, else the selected columns,
/// else every column of the table
fn stable_order(meta: Option<&TableMetadata>, selected: &[String]) -> Vec<String> {
    if let Some(meta) = meta {
        let key: Vec<String> = meta
            .primary_key_columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let selectable = key
            .iter()
            .all(|k| selected.is_empty() || selected.iter().any(|s| s.eq_ignore_ascii_case(k)));
        if !key.is_empty() && selectable {
            return key;
        }
    }
    if !selected.is_empty() {
        return selected.to_vec();
    }
    meta.map(|m| m.columns.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default()
}

fn strip_row_number(row: Row) -> Row {
    let Some(idx) = row
        .columns()
        .iter()
        .position(|c| c.eq_ignore_ascii_case(PAGING_ROW_NUMBER_COLUMN))
    else {
        return row;
    };
    let mut columns = row.columns().to_vec();
    let mut values = row.into_values();
    columns.remove(idx);
    values.remove(idx);
    Row::new(columns, values)
}

#[async_trait]
impl Connector for SqlConnector {
    fn name(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> ConnectorKind {
        match self.config.vendor {
            SqlVendor::Postgres => ConnectorKind::Postgres,
            SqlVendor::Mysql => ConnectorKind::MySql,
        }
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.conn.is_some() {
            return Err(EngineError::AlreadyConnected(self.label.clone()));
        }

        info!(
            connector = %self.label,
            endpoint = %self.config.endpoint(),
            "Connecting to {}",
            self.dialect.name()
        );
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = self.factory.connect(&self.connection) => result,
        };
        let conn =
            result.map_err(|e| EngineError::connection_with_source(self.label.clone(), e))?;

        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(connector = %self.label, "Error closing connection: {}", e);
            }
            debug!(connector = %self.label, "Disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn query_indexer(&self) -> QueryIndexer {
        self.dialect.indexer().into()
    }

    fn write_statement(&self, target: &TargetSpec, columns: &[String]) -> Result<WriteStatement> {
        let (schema, table) = self.target_table(target)?;
        if columns.is_empty() {
            return Err(EngineError::config(format!(
                "no columns to write into '{}'",
                target.describe()
            )));
        }
        let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        Ok(WriteStatement {
            text: self.dialect.insert_query(schema, table, &refs)?,
            columns: columns.to_vec(),
        })
    }

    async fn execute_many(
        &mut self,
        statement: &WriteStatement,
        rows: &[Vec<Value>],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.session()?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = write_batch(conn, &statement.text, rows) => Some(result),
        };

        match outcome {
            Some(Ok(affected)) => {
                debug!(connector = %self.label, rows = rows.len(), affected, "Batch committed");
                Ok(affected)
            }
            Some(Err(e)) => {
                warn!(connector = %self.label, rows = rows.len(), "Batch failed: {}", e);
                self.disconnect().await;
                Err(EngineError::batch_write_with_source(
                    self.label.clone(),
                    rows.len(),
                    e,
                ))
            }
            None => {
                self.disconnect().await;
                Err(EngineError::Cancelled)
            }
        }
    }

    async fn truncate(&mut self, target: &TargetSpec, cancel: &CancellationToken) -> Result<()> {
        let (schema, table) = self.target_table(target)?;
        let sql = self.dialect.truncate_table_query(schema, table)?;
        let conn = self.session()?;
        info!(connector = %self.label, table = %target.describe(), "Truncating target");
        cancellable(cancel, async {
            conn.execute(&sql, &[]).await.map_err(EngineError::from)
        })
        .await?;
        Ok(())
    }

    async fn count(&mut self, source: &SourceSpec, cancel: &CancellationToken) -> Result<u64> {
        let sql = match source {
            SourceSpec::Table { schema, table } => {
                self.dialect.table_count_query(schema.as_deref(), table)?
            }
            SourceSpec::Query { query } => self.dialect.count_query(query)?,
        };
        let conn = self.session()?;
        let row = cancellable(cancel, async {
            conn.query_one(&sql, &[]).await.map_err(EngineError::from)
        })
        .await?;

        row.as_ref()
            .and_then(|r| r.get_by_name(COUNT_COLUMN).or_else(|| r.get(0)))
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                EngineError::transfer(format!("count query on '{}' returned no count", self.label))
            })
    }

    async fn read_page(
        &mut self,
        source: &SourceSpec,
        columns: &[String],
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        let order = self.page_order(source, columns, cancel).await?;
        let order: Vec<&str> = order.iter().map(String::as_str).collect();
        let base = self.source_query(source, columns)?;
        let sql = self.dialect.ordered_paging_query(&base, &order, start, end)?;
        let conn = self.session()?;
        let rows = cancellable(cancel, async {
            conn.query(&sql, &[]).await.map_err(EngineError::from)
        })
        .await?;
        Ok(rows.into_iter().map(strip_row_number).collect())
    }
}

/// Bounded source of extra sessions to one database
#[derive(Clone)]
pub struct SqlEngine {
    label: String,
    factory: Arc<dyn ConnectionFactory>,
    connection: ConnectionConfig,
    permits: Arc<Semaphore>,
    max_connections: u32,
}

impl std::fmt::Debug for SqlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlEngine")
            .field("label", &self.label)
            .field("url", &self.connection.redacted_url())
            .field("max_connections", &self.max_connections)
            .field("available", &self.available())
            .finish()
    }
}

impl SqlEngine {
    /// Open a session, waiting while `max_connections` are in use
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::connection(self.label.clone(), "engine is closed"))?;
        let conn = self
            .factory
            .connect(&self.connection)
            .await
            .map_err(|e| EngineError::connection_with_source(self.label.clone(), e))?;
        Ok(PooledConnection {
            conn,
            _permit: permit,
        })
    }

    /// Upper bound on concurrently open sessions
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    /// Sessions that can still be opened without waiting
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// URL with the password masked
    pub fn url(&self) -> String {
        self.connection.redacted_url()
    }
}

/// Session opened through [`SqlEngine`]; releases its slot when dropped
pub struct PooledConnection {
    conn: Box<dyn Connection>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Close the session and release the slot
    pub async fn close(self) -> Result<()> {
        Ok(self.conn.close().await?)
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

/// Builds [`SqlConnector`]s over one relational driver
pub struct SqlConnectorFactory {
    connections: Arc<dyn ConnectionFactory>,
}

impl SqlConnectorFactory {
    /// Factory over `connections`
    pub fn new(connections: Arc<dyn ConnectionFactory>) -> Self {
        Self { connections }
    }
}

impl ConnectorFactory for SqlConnectorFactory {
    fn create(
        &self,
        config: &ConnectorConfig,
        context: &ConnectorContext,
    ) -> Result<Box<dyn Connector>> {
        match config {
            ConnectorConfig::Sql(sql) => Ok(Box::new(SqlConnector::new(
                context.label.clone(),
                sql.clone(),
                self.connections.clone(),
                context.connect_timeout,
            )?)),
            other => Err(EngineError::config(format!(
                "SQL connector cannot serve a '{}' configuration",
                other.connector_type()
            ))),
        }
    }
}
