//! PostgreSQL backend implementation for conflux-rdbc
//!
//! Provides PostgreSQL-specific implementations:
//! - Connection over a `tokio-postgres` client
//! - Transaction support with explicit BEGIN/COMMIT/ROLLBACK
//! - Connection factory with optional rustls TLS

use async_trait::async_trait;
use rustls::ClientConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, QueryDeadline, Transaction,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Parameter adapter that encodes a [`Value`] for the column type the server reports.
///
/// Values read from another vendor rarely carry the exact width of the target
/// column (MySQL returns every integer as BIGINT), so integers, floats and
/// text are converted to the requested type before encoding.
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

type BoxError = Box<dyn std::error::Error + Sync + Send>;

fn narrow<T: TryFrom<i64>>(value: &Value, ty: &Type) -> std::result::Result<T, BoxError> {
    let n = value
        .as_i64()
        .ok_or_else(|| format!("cannot bind {} to {}", value.sql_type(), ty))?;
    T::try_from(n).map_err(|_| format!("value {} out of range for {}", n, ty).into())
}

fn float(value: &Value, ty: &Type) -> std::result::Result<f64, BoxError> {
    match value {
        Value::Float32(f) => Ok(f64::from(*f)),
        Value::Float64(f) => Ok(*f),
        Value::Decimal(d) => d
            .to_string()
            .parse()
            .map_err(|e: std::num::ParseFloatError| e.into()),
        other => other
            .as_i64()
            .map(|n| n as f64)
            .ok_or_else(|| format!("cannot bind {} to {}", other.sql_type(), ty).into()),
    }
}

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }
        match *ty {
            Type::INT2 => narrow::<i16>(value, ty)?.to_sql(ty, out),
            Type::INT4 => narrow::<i32>(value, ty)?.to_sql(ty, out),
            Type::INT8 => narrow::<i64>(value, ty)?.to_sql(ty, out),
            Type::FLOAT4 => (float(value, ty)? as f32).to_sql(ty, out),
            Type::FLOAT8 => float(value, ty)?.to_sql(ty, out),
            Type::BOOL => value
                .as_bool()
                .ok_or_else(|| format!("cannot bind {} to {}", value.sql_type(), ty))?
                .to_sql(ty, out),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => value
                .to_text()
                .unwrap_or_default()
                .to_sql(ty, out),
            _ => match value {
                Value::Null => Ok(IsNull::Yes),
                Value::Bool(b) => b.to_sql(ty, out),
                Value::Int16(n) => n.to_sql(ty, out),
                Value::Int32(n) => n.to_sql(ty, out),
                Value::Int64(n) => n.to_sql(ty, out),
                Value::Float32(n) => n.to_sql(ty, out),
                Value::Float64(n) => n.to_sql(ty, out),
                Value::Decimal(d) => d.to_sql(ty, out),
                Value::String(s) => s.to_sql(ty, out),
                Value::Bytes(b) => b.to_sql(ty, out),
                Value::Date(d) => d.to_sql(ty, out),
                Value::Time(t) => t.to_sql(ty, out),
                Value::DateTime(dt) => dt.to_sql(ty, out),
                Value::DateTimeTz(dt) => dt.to_sql(ty, out),
                Value::Uuid(u) => u.to_sql(ty, out),
                Value::Json(j) => j.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn pg_params(params: &[Value]) -> Vec<PgParam<'_>> {
    params.iter().map(PgParam).collect()
}

fn param_refs<'a>(params: &'a [PgParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Convert a tokio-postgres row to a conflux Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

fn typed<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, wrap: F) -> Value
where
    T: tokio_postgres::types::FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    row.try_get::<_, Option<T>>(idx)
        .ok()
        .flatten()
        .map(wrap)
        .unwrap_or(Value::Null)
}

/// Convert a PostgreSQL value to a conflux Value
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    match *pg_type {
        Type::BOOL => typed(row, idx, Value::Bool),
        Type::INT2 => typed(row, idx, Value::Int16),
        Type::INT4 => typed(row, idx, Value::Int32),
        Type::INT8 => typed(row, idx, Value::Int64),
        Type::FLOAT4 => typed(row, idx, Value::Float32),
        Type::FLOAT8 => typed(row, idx, Value::Float64),
        Type::NUMERIC => typed(row, idx, Value::Decimal),
        Type::BYTEA => typed(row, idx, Value::Bytes),
        Type::DATE => typed(row, idx, Value::Date),
        Type::TIME => typed(row, idx, Value::Time),
        Type::TIMESTAMP => typed(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => typed(row, idx, Value::DateTimeTz),
        Type::UUID => typed(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => typed(row, idx, Value::Json),
        _ => typed(row, idx, Value::String),
    }
}

fn build_tls() -> Result<MakeRustlsConnect> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::config(format!("Invalid TLS configuration: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(tls_config))
}

async fn pg_query(
    client: &tokio_postgres::Client,
    deadline: QueryDeadline,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Row>> {
    let params = pg_params(params);
    let pg_rows = deadline
        .run(sql, async {
            client
                .query(sql, &param_refs(&params))
                .await
                .map_err(|e| Error::query_failed(sql, e))
        })
        .await?;
    Ok(pg_rows.iter().map(pg_row_to_row).collect())
}

async fn pg_execute(
    client: &tokio_postgres::Client,
    deadline: QueryDeadline,
    sql: &str,
    params: &[Value],
) -> Result<u64> {
    let params = pg_params(params);
    deadline
        .run(sql, async {
            client
                .execute(sql, &param_refs(&params))
                .await
                .map_err(|e| Error::query_failed(sql, e))
        })
        .await
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
    deadline: QueryDeadline,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
            deadline: QueryDeadline::from_millis(0),
        }
    }

    /// Bound every statement by `deadline`
    pub fn with_deadline(mut self, deadline: QueryDeadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Create a new connection from configuration
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::config(format!("Invalid PostgreSQL URL: {}", e)))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(app) = &config.application_name {
            pg_config.application_name(app);
        }

        let client = if config.tls {
            let (client, connection) = pg_config
                .connect(build_tls()?)
                .await
                .map_err(|e| Error::connection_with_source("Failed to connect to PostgreSQL", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("PostgreSQL connection error: {}", e);
                }
            });
            client
        } else {
            let (client, connection) = pg_config
                .connect(NoTls)
                .await
                .map_err(|e| Error::connection_with_source("Failed to connect to PostgreSQL", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("PostgreSQL connection error: {}", e);
                }
            });
            client
        };

        debug!("Connected to PostgreSQL at {}", config.redacted_url());
        Ok(Self::new(client).with_deadline(QueryDeadline::of(config)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        pg_query(&self.client, self.deadline, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        pg_execute(&self.client, self.deadline, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::transaction_with_source("Failed to begin transaction", e))?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            deadline: self.deadline,
        }))
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
    deadline: QueryDeadline,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        pg_query(&self.client, self.deadline, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        pg_execute(&self.client, self.deadline, sql, params).await
    }

    async fn execute_many(&self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        self.deadline
            .run(sql, async {
                let statement = self
                    .client
                    .prepare(sql)
                    .await
                    .map_err(|e| Error::query_failed(sql, e))?;

                let mut affected = 0;
                for row in rows {
                    let params = pg_params(row);
                    affected += self
                        .client
                        .execute(&statement, &param_refs(&params))
                        .await
                        .map_err(|e| Error::query_failed(sql, e))?;
                }
                Ok(affected)
            })
            .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| Error::transaction_with_source("Failed to commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| Error::transaction_with_source("Failed to rollback transaction", e))
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let conn = PgConnection::connect(config).await?;
        Ok(Box::new(conn))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}
