//! Shared fixtures for engine integration tests
//!
//! `MemoryDatabase` answers the statements the PostgreSQL dialect generates
//! (count, column introspection, row-number paging, INSERT, TRUNCATE) against
//! in-memory tables, so the real `SqlConnector` runs end to end without a
//! server. A table's key is its `id` column.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use conflux_engine::config::{
    AuthConfig, ConnectorConfig, SensitiveString, ServerConfig, SoapConnectorConfig,
    SoapSettings, SqlConnectorConfig, SqlVendor,
};
use conflux_engine::connector::{ConnectorRegistry, SoapConnectorFactory};
use conflux_engine::events::{EventName, TaskMessage};
use conflux_engine::operation::{Integration, SourceSpec, TargetSpec, TransferRules};
use conflux_engine::{Engine, EngineBuilder};
use conflux_rdbc::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use conflux_rdbc::dialect::PAGING_ROW_NUMBER_COLUMN;
use conflux_rdbc::types::{Row, Value};
use conflux_rdbc::{Error, Result};
use parking_lot::Mutex;
use regex::Regex;
use wiremock::MockServer;

const TABLE: &str = r#"(?:"[^"]+"\.)?"([^"]+)""#;

static SELECT_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("FROM {TABLE}")).unwrap());
static PAGE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"> (\d+) AND "conflux_row_number" <= (\d+)"#).unwrap());
static INSERT_INTO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^INSERT INTO {TABLE} \(([^)]*)\)")).unwrap());
static TRUNCATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^TRUNCATE TABLE {TABLE}")).unwrap());
static COLUMNS_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"c\.table_name = '([^']+)'").unwrap());
static WINDOW_ORDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"OVER \(ORDER BY "([^"]+)""#).unwrap());

/// Tables shared by every session of one fake server
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    reject: Mutex<BTreeSet<(String, i64)>>,
    page_queries: Mutex<Vec<String>>,
    open_sessions: AtomicI64,
    connects: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables.lock().insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Fail the INSERT of the row whose first value is `id`
    pub fn reject_insert(&self, table: &str, id: i64) {
        self.reject.lock().insert((table.to_string(), id));
    }

    /// Every paging query received, in order
    pub fn page_queries(&self) -> Vec<String> {
        self.page_queries.lock().clone()
    }

    pub fn open_sessions(&self) -> i64 {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    fn table_of(&self, sql: &str) -> Result<String> {
        SELECT_FROM
            .captures(sql)
            .map(|c| c[1].to_string())
            .ok_or_else(|| Error::query(format!("unsupported statement: {sql}")))
    }

    fn columns(&self, sql: &str) -> Vec<Row> {
        let Some(caps) = COLUMNS_OF.captures(sql) else {
            return Vec::new();
        };
        let tables = self.tables.lock();
        let Some(first) = tables.get(&caps[1]).and_then(|rows| rows.first()) else {
            return Vec::new();
        };
        first
            .columns()
            .iter()
            .map(|name| {
                let key = if name == "id" { Value::Int64(1) } else { Value::Null };
                Row::from_pairs([
                    ("column_name", Value::from(name.clone())),
                    ("data_type", Value::from("text")),
                    ("pk_ordinal", key),
                ])
            })
            .collect()
    }

    fn table_rows(&self, table: &str) -> Result<Vec<Row>> {
        self.tables
            .lock()
            .get(table)
            .cloned()
            .ok_or_else(|| Error::query(format!("relation \"{table}\" does not exist")))
    }
}

pub struct MemoryFactory(pub Arc<MemoryDatabase>);

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        self.0.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            db: self.0.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

struct MemoryConnection {
    db: Arc<MemoryDatabase>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        if sql.contains("information_schema.columns") {
            return Ok(self.db.columns(sql));
        }

        let table = self.db.table_of(sql)?;
        let mut rows = self.db.table_rows(&table)?;

        if sql.starts_with("SELECT COUNT(*)") {
            return Ok(vec![Row::from_pairs([("count", rows.len() as i64)])]);
        }

        let caps = PAGE_RANGE
            .captures(sql)
            .ok_or_else(|| Error::query(format!("unsupported query: {sql}")))?;
        let start: usize = caps[1].parse().unwrap_or(0);
        let end: usize = caps[2].parse().unwrap_or(0);
        self.db.page_queries.lock().push(sql.to_string());

        if let Some(order) = WINDOW_ORDER.captures(sql) {
            let column = order[1].to_string();
            rows.sort_by_key(|row| row.get_by_name(&column).and_then(Value::as_i64));
        }

        Ok(rows
            .into_iter()
            .enumerate()
            .skip(start)
            .take(end.saturating_sub(start))
            .map(|(idx, row)| {
                let mut columns = row.columns().to_vec();
                let mut values = row.into_values();
                columns.push(PAGING_ROW_NUMBER_COLUMN.to_string());
                values.push(Value::Int64(idx as i64 + 1));
                Row::new(columns, values)
            })
            .collect())
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64> {
        let caps = TRUNCATE
            .captures(sql)
            .ok_or_else(|| Error::query(format!("unsupported statement: {sql}")))?;
        let mut tables = self.db.tables.lock();
        let removed = tables.get(&caps[1]).map(Vec::len).unwrap_or(0);
        tables.insert(caps[1].to_string(), Vec::new());
        Ok(removed as u64)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            db: self.db.clone(),
            pending: Mutex::new(Vec::new()),
        }))
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryTransaction {
    db: Arc<MemoryDatabase>,
    pending: Mutex<Vec<(String, Row)>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let caps = INSERT_INTO
            .captures(sql)
            .ok_or_else(|| Error::query(format!("unsupported statement: {sql}")))?;
        let table = caps[1].to_string();
        let columns: Vec<String> = caps[2]
            .split(',')
            .map(|c| c.trim().trim_matches('"').to_string())
            .collect();

        if let Some(id) = params.first().and_then(Value::as_i64) {
            if self.db.reject.lock().contains(&(table.clone(), id)) {
                return Err(Error::query(format!(
                    "duplicate key value violates unique constraint \"{table}_pkey\""
                )));
            }
        }
        self.pending
            .lock()
            .push((table, Row::new(columns, params.to_vec())));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut tables = self.db.tables.lock();
        for (table, row) in pending {
            tables.entry(table).or_default().push(row);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.pending.lock().clear();
        Ok(())
    }
}

pub fn customers(n: i64) -> Vec<Row> {
    (1..=n)
        .map(|id| {
            Row::from_pairs([
                ("id", Value::Int64(id)),
                ("name", Value::from(format!("customer-{id}"))),
            ])
        })
        .collect()
}

pub fn postgres() -> ConnectorConfig {
    ConnectorConfig::Sql(SqlConnectorConfig {
        vendor: SqlVendor::Postgres,
        server: ServerConfig {
            host: "db.local".into(),
            port: None,
        },
        auth: AuthConfig {
            user: "etl".into(),
            password: SensitiveString::new("secret"),
        },
        database: "warehouse".into(),
        ssl: false,
        max_connections: 4,
        query_timeout_ms: 0,
    })
}

pub fn soap(server: &MockServer) -> ConnectorConfig {
    let uri = url::Url::parse(&server.uri()).unwrap();
    ConnectorConfig::Soap(SoapConnectorConfig {
        server: ServerConfig {
            host: uri.host_str().unwrap().to_string(),
            port: uri.port(),
        },
        auth: None,
        ssl: false,
        soap: SoapSettings {
            wsdl: "/CustomerService?wsdl".into(),
            endpoint: None,
            namespace: "urn:erp".into(),
            timeout_ms: 5_000,
        },
    })
}

fn table(name: &str) -> SourceSpec {
    SourceSpec::Table {
        schema: Some("public".into()),
        table: name.into(),
    }
}

pub fn copy_table(name: &str, from: &str, to: &str, batch_size: u32) -> Integration {
    Integration::new(
        name,
        postgres(),
        postgres(),
        TransferRules::new(
            table(from),
            TargetSpec::Table {
                schema: Some("public".into()),
                table: to.into(),
            },
        )
        .with_batch_size(batch_size),
    )
}

pub fn table_to_soap(name: &str, from: &str, server: &MockServer) -> Integration {
    Integration::new(
        name,
        postgres(),
        soap(server),
        TransferRules::new(
            table(from),
            TargetSpec::Soap {
                operation: "ImportCustomers".into(),
            },
        )
        .with_column("id", "customerId")
        .with_column("name", "displayName"),
    )
}

pub fn registry(db: &Arc<MemoryDatabase>) -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry.register_sql(Arc::new(MemoryFactory(db.clone())));
    registry.register("soap", Arc::new(SoapConnectorFactory));
    registry
}

pub fn builder(db: &Arc<MemoryDatabase>) -> EngineBuilder {
    Engine::builder().connectors(registry(db))
}

/// Collects every message delivered to the engine's subscribers
#[derive(Clone, Default)]
pub struct Recorder {
    messages: Arc<Mutex<Vec<TaskMessage>>>,
}

impl Recorder {
    pub fn attach(engine: &Engine) -> Self {
        let recorder = Self::default();
        for event in EventName::ALL {
            let messages = recorder.messages.clone();
            engine.subscribe(event, move |m| messages.lock().push(m.clone()));
        }
        recorder
    }

    pub fn messages(&self) -> Vec<TaskMessage> {
        self.messages.lock().clone()
    }

    pub fn events(&self) -> Vec<EventName> {
        self.messages.lock().iter().map(|m| m.event).collect()
    }

    pub fn lifecycle(&self) -> Vec<EventName> {
        self.events().into_iter().filter(|e| e.is_lifecycle()).collect()
    }

    pub fn count(&self, event: EventName) -> usize {
        self.events().into_iter().filter(|e| *e == event).count()
    }
}
