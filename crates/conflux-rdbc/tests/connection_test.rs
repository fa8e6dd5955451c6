//! Integration tests for conflux-rdbc connection traits and schema inspection
//!
//! Uses a scripted in-memory connection: every query is matched against a
//! list of (fragment, rows) pairs.

use std::sync::Arc;

use async_trait::async_trait;
use conflux_rdbc::connection::{Connection, ConnectionConfig, Transaction};
use conflux_rdbc::dialect::{MySqlDialect, PostgresDialect};
use conflux_rdbc::schema::SchemaInspector;
use conflux_rdbc::types::{Row, Value};
use conflux_rdbc::{Error, ErrorCategory, Result};
use tokio::sync::Mutex;

#[derive(Default)]
struct ScriptedConnection {
    script: Vec<(&'static str, Vec<Row>)>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnection {
    fn respond(mut self, fragment: &'static str, rows: Vec<Row>) -> Self {
        self.script.push((fragment, rows));
        self
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.executed.lock().await.push(sql.to_string());
        Ok(self
            .script
            .iter()
            .find(|(fragment, _)| sql.contains(fragment))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64> {
        self.executed.lock().await.push(sql.to_string());
        Ok(1)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(CountingTransaction {
            fail_on: None,
            statements: self.executed.clone(),
        }))
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct CountingTransaction {
    fail_on: Option<i64>,
    statements: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transaction for CountingTransaction {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        if params.first().and_then(Value::as_i64) == self.fail_on {
            return Err(Error::query("duplicate key"));
        }
        self.statements.lock().await.push(sql.to_string());
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn table_row(name: &str) -> Row {
    Row::from_pairs([("table_name", Value::from(name))])
}

fn fk_row(constraint: &str, table: &str, referenced: &str) -> Row {
    Row::from_pairs([
        ("constraint_name", Value::from(constraint)),
        ("table_name", Value::from(table)),
        ("referenced_schema", Value::from("shop")),
        ("referenced_table", Value::from(referenced)),
    ])
}

#[tokio::test]
async fn test_default_execute_many_sums_and_stops_at_failure() {
    let statements = Arc::new(Mutex::new(Vec::new()));
    let tx = CountingTransaction {
        fail_on: Some(3),
        statements: statements.clone(),
    };

    let ok_rows = vec![vec![Value::Int64(1)], vec![Value::Int64(2)]];
    assert_eq!(tx.execute_many("INSERT", &ok_rows).await.unwrap(), 2);

    let failing = vec![
        vec![Value::Int64(4)],
        vec![Value::Int64(3)],
        vec![Value::Int64(5)],
    ];
    let err = tx.execute_many("INSERT", &failing).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Query);
    // Row 5 is never attempted
    assert_eq!(statements.lock().await.len(), 3);
}

#[tokio::test]
async fn test_query_one_returns_first_row() {
    let conn = ScriptedConnection::default().respond(
        "FROM t",
        vec![table_row("first"), table_row("second")],
    );
    let row = conn.query_one("SELECT * FROM t", &[]).await.unwrap().unwrap();
    assert_eq!(row.get_by_name("table_name"), Some(&Value::from("first")));
    assert!(conn.query_one("SELECT 1", &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_inspector_sorts_tables_by_foreign_keys() {
    let conn = ScriptedConnection::default()
        .respond(
            "KEY_COLUMN_USAGE",
            vec![
                fk_row("fk_items_order", "order_items", "orders"),
                fk_row("fk_orders_customer", "orders", "customers"),
            ],
        )
        .respond(
            "BASE TABLE",
            vec![
                table_row("order_items"),
                table_row("orders"),
                table_row("customers"),
            ],
        );
    let executed = conn.executed.clone();

    let inspector = SchemaInspector::new(&conn, Arc::new(MySqlDialect));
    let sorted = inspector
        .sorted_table_and_foreign_key_names("shop")
        .await
        .unwrap();

    let names: Vec<_> = sorted.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["customers", "orders", "order_items"]);
    assert_eq!(sorted[2].foreign_keys[0].referenced_table, "orders");
    assert_eq!(executed.lock().await.len(), 2);
}

#[tokio::test]
async fn test_inspector_reads_column_metadata() {
    let conn = ScriptedConnection::default().respond(
        "column_name",
        vec![
            Row::from_pairs([
                ("column_name", Value::from("id")),
                ("data_type", Value::from("bigint")),
                ("nullable", Value::Bool(false)),
                ("ordinal", Value::Int32(1)),
                ("max_length", Value::Null),
                ("precision", Value::Int32(64)),
                ("scale", Value::Int32(0)),
                ("pk_ordinal", Value::Int32(1)),
            ]),
            Row::from_pairs([
                ("column_name", Value::from("email")),
                ("data_type", Value::from("character varying")),
                ("nullable", Value::Bool(true)),
                ("ordinal", Value::Int32(2)),
                ("max_length", Value::Int32(255)),
                ("precision", Value::Null),
                ("scale", Value::Null),
                ("pk_ordinal", Value::Null),
            ]),
        ],
    );

    let inspector = SchemaInspector::new(&conn, Arc::new(PostgresDialect));
    let table = inspector.table("public", "users").await.unwrap().unwrap();

    assert_eq!(table.qualified_name(), "public.users");
    assert_eq!(table.columns.len(), 2);
    assert!(!table.columns[0].nullable);
    assert!(table.columns[0].is_primary_key());
    assert_eq!(table.columns[1].max_length, Some(255));
}

#[tokio::test]
async fn test_inspector_missing_table_is_none() {
    let conn = ScriptedConnection::default();
    let inspector = SchemaInspector::new(&conn, Arc::new(PostgresDialect));
    assert!(inspector.table("public", "ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_inspector_rejects_incomplete_rows() {
    let conn = ScriptedConnection::default().respond(
        "schema_name",
        vec![Row::from_pairs([("unexpected", Value::from("x"))])],
    );
    let inspector = SchemaInspector::new(&conn, Arc::new(PostgresDialect));
    let err = inspector.schemas().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Schema);
}

#[test]
fn test_connection_config_defaults() {
    let config = ConnectionConfig::default();
    assert!(config.url.is_empty());
    assert_eq!(config.connect_timeout_ms, 10_000);
    assert_eq!(config.application_name.as_deref(), Some("conflux"));
    assert!(!config.tls);
}
