//! End-to-end runs through the engine façade

mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{builder, copy_table, customers, table_to_soap, MemoryDatabase, Recorder};
use conflux_engine::config::EngineConfig;
use conflux_engine::error::{EngineError, ErrorKind};
use conflux_engine::events::EventName;
use conflux_engine::initializer::{Initializer, ParameterInitializer};
use conflux_engine::operation::{Operation, SourceSpec};
use conflux_engine::orchestrator::{OperationOutcome, OperationState};
use conflux_engine::scheduler::IntegrationState;
use conflux_rdbc::types::Value;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn soap_service(post_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/CustomerService"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<definitions/>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/CustomerService"))
        .respond_with(ResponseTemplate::new(post_status).set_body_string("<ok/>"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_successful_run_lifecycle() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("a", customers(60));
    let engine = builder(&db).build()?;
    let recorder = Recorder::attach(&engine);

    let operation = Operation::new("nightly").with_integration(copy_table("a_to_b", "a", "b", 25));
    let report = engine.run(operation).await?;

    assert_eq!(report.state, OperationState::Finished(OperationOutcome::Succeeded));
    assert_eq!(report.rows, 60);
    assert_eq!(db.rows("b").len(), 60);
    assert_eq!(
        recorder.lifecycle(),
        vec![EventName::Initialized, EventName::Started, EventName::Finished]
    );

    let finished = recorder.messages().pop().unwrap();
    assert!(finished.terminal);
    assert!(finished.is_success());

    // Three pages of 25, 25 and 10 rows
    let logs: Vec<_> = recorder
        .messages()
        .into_iter()
        .filter(|m| m.event == EventName::Log)
        .filter_map(|m| m.payload.row_count)
        .collect();
    assert_eq!(logs, vec![0, 25, 50, 60]);
    assert_eq!(db.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_copied_rows_keep_their_values() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("a", customers(3));
    let engine = builder(&db).build()?;

    engine
        .run(Operation::new("copy").with_integration(copy_table("copy", "a", "b", 2)))
        .await?;

    let rows = db.rows("b");
    assert_eq!(rows[2].columns(), &["id".to_string(), "name".to_string()]);
    assert_eq!(rows[2].get_by_name("id"), Some(&Value::Int64(3)));
    assert_eq!(
        rows[2].get_by_name("name").and_then(|v| v.as_str()),
        Some("customer-3")
    );
    Ok(())
}

#[tokio::test]
async fn test_sql_batch_then_soap_failure() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("a", customers(100));
    db.seed("c", customers(10));
    let server = soap_service(500).await;

    let engine = builder(&db).build()?;
    let recorder = Recorder::attach(&engine);

    let operation = Operation::new("sync")
        .with_integration(copy_table("a_to_b", "a", "b", 25))
        .with_integration(table_to_soap("c_to_erp", "c", &server));
    let err = engine.run(operation).await.unwrap_err();

    assert!(matches!(err, EngineError::BatchWrite { rows: 10, .. }), "{err}");
    assert_eq!(db.rows("b").len(), 100);

    assert_eq!(
        recorder.lifecycle(),
        vec![EventName::Initialized, EventName::Started, EventName::Finished]
    );
    let finished: Vec<_> = recorder
        .messages()
        .into_iter()
        .filter(|m| m.event == EventName::Finished)
        .collect();
    assert_eq!(finished.len(), 1);
    let report = finished[0].error.as_ref().unwrap();
    assert_eq!(report.kind, ErrorKind::BatchWrite);
    assert_eq!(report.integration.as_deref(), Some("c_to_erp"));
    assert_eq!(report.position, Some(1));
    assert_eq!(report.message, err.to_string());

    assert_eq!(recorder.count(EventName::IntegrationStarted), 2);
    assert_eq!(recorder.count(EventName::IntegrationFinished), 1);
    assert_eq!(db.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_soap_target_receives_mapped_rows() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("c", customers(2));

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("<tns:customerId>2</tns:customerId>"))
        .and(body_string_contains("<tns:displayName>customer-1</tns:displayName>"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<ok/>"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = builder(&db).build()?;
    let report = engine
        .run(Operation::new("push").with_integration(table_to_soap("c_to_erp", "c", &server)))
        .await?;
    assert_eq!(report.rows, 2);
    Ok(())
}

#[tokio::test]
async fn test_failure_at_k_skips_the_rest() -> Result<()> {
    let db = MemoryDatabase::new();
    for table in ["s0", "s1", "s2", "s3"] {
        db.seed(table, customers(5));
    }
    // Third row of integration #1 collides
    db.reject_insert("t1", 3);

    let engine = builder(&db).build()?;
    let recorder = Recorder::attach(&engine);

    let mut operation = Operation::new("fan_out");
    for i in 0..4 {
        operation = operation.with_integration(copy_table(
            &format!("i{i}"),
            &format!("s{i}"),
            &format!("t{i}"),
            10,
        ));
    }
    let err = engine.run(operation).await.unwrap_err();
    assert!(matches!(err, EngineError::BatchWrite { .. }));

    // Batch of five rolled back as a whole
    assert_eq!(db.rows("t0").len(), 5);
    assert!(db.rows("t1").is_empty());
    assert!(db.rows("t2").is_empty());
    assert!(db.rows("t3").is_empty());

    assert_eq!(recorder.count(EventName::IntegrationStarted), 2);
    assert_eq!(recorder.count(EventName::Finished), 1);
    assert_eq!(db.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_truncate_target_before_load() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("a", customers(4));
    db.seed("b", customers(9));
    let engine = builder(&db).build()?;

    let mut integration = copy_table("reload", "a", "b", 100);
    integration.rules.truncate_target = true;
    engine
        .run(Operation::new("reload").with_integration(integration))
        .await?;

    assert_eq!(db.rows("b").len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_no_callback_leaks_across_runs() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("a", customers(1));
    let engine = builder(&db).build()?;

    let calls = Arc::new(parking_lot::Mutex::new(0u32));
    let counter = calls.clone();
    let id = engine.subscribe(EventName::Finished, move |_| *counter.lock() += 1);

    let operation = || Operation::new("once").with_integration(copy_table("x", "a", "b", 10));
    engine.run(operation()).await?;
    assert_eq!(*calls.lock(), 1);

    assert!(engine.unsubscribe(EventName::Finished, id));
    engine.run(operation()).await?;
    assert_eq!(*calls.lock(), 1);

    let late = Recorder::attach(&engine);
    engine.run(operation()).await?;
    assert_eq!(
        late.lifecycle(),
        vec![EventName::Initialized, EventName::Started, EventName::Finished]
    );
    Ok(())
}

#[tokio::test]
async fn test_cancelled_run() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("a", customers(10));
    let engine = builder(&db).build()?;
    let recorder = Recorder::attach(&engine);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .run_with_cancel(
            Operation::new("cancelled").with_integration(copy_table("x", "a", "b", 5)),
            cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(db.rows("b").is_empty());
    assert_eq!(db.connects(), 0);
    let finished = recorder.messages().pop().unwrap();
    assert_eq!(finished.event, EventName::Finished);
    assert_eq!(finished.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
    Ok(())
}

#[tokio::test]
async fn test_invalid_operations_are_rejected_before_events() -> Result<()> {
    let db = MemoryDatabase::new();
    let engine = builder(&db).build()?;
    let recorder = Recorder::attach(&engine);

    let empty = Operation::new("empty");
    assert!(matches!(
        engine.run(empty).await,
        Err(EngineError::InvalidOperation(_))
    ));

    let duplicate = Operation::new("dup")
        .with_integration(copy_table("same", "a", "b", 10))
        .with_integration(copy_table("same", "a", "c", 10));
    assert!(matches!(
        engine.run(duplicate).await,
        Err(EngineError::InvalidOperation(_))
    ));

    let unnamed = Operation::new("  ").with_integration(copy_table("x", "a", "b", 10));
    assert!(matches!(
        engine.run(unnamed).await,
        Err(EngineError::InvalidOperation(_))
    ));

    assert!(recorder.messages().is_empty());
    assert_eq!(db.connects(), 0);
    Ok(())
}

struct Noop(&'static str);

impl Initializer for Noop {
    fn name(&self) -> &str {
        self.0
    }

    fn initialize(&self, operation: Operation) -> conflux_engine::Result<Operation> {
        Ok(operation)
    }
}

#[tokio::test]
async fn test_initializer_ambiguity() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("a", customers(1));
    let engine = builder(&db)
        .initializer(Arc::new(Noop("beta")))
        .initializer(Arc::new(Noop("alpha")))
        .build()?;
    let recorder = Recorder::attach(&engine);

    let err = engine
        .run(Operation::new("op").with_integration(copy_table("x", "a", "b", 10)))
        .await
        .unwrap_err();
    match err {
        EngineError::InitializerAmbiguity { candidates } => {
            assert_eq!(candidates, vec!["alpha", "beta"]);
        }
        other => panic!("expected ambiguity, got {other}"),
    }
    assert!(recorder.messages().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_selected_parameter_initializer() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("customers_eu", customers(7));

    let config = EngineConfig {
        initializer: Some(ParameterInitializer::NAME.to_string()),
        ..Default::default()
    };
    let engine = builder(&db)
        .config(config)
        .initializer(Arc::new(ParameterInitializer::new().with_default("region", "us")))
        .initializer(Arc::new(Noop("other")))
        .build()?;

    let mut integration = copy_table("regional", "placeholder", "b", 10);
    integration.rules.source = SourceSpec::Table {
        schema: Some("public".into()),
        table: "customers_${region}".into(),
    };
    let operation = Operation::new("regional")
        .with_parameter("region", "eu")
        .with_integration(integration);

    let report = engine.run(operation).await?;
    assert_eq!(report.rows, 7);
    assert_eq!(report.integrations[0].state, IntegrationState::Succeeded);
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_events_carry_initialized_operation() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("customers_emea", customers(4));

    let engine = builder(&db)
        .initializer(Arc::new(ParameterInitializer::new()))
        .build()?;
    let recorder = Recorder::attach(&engine);

    let mut integration = copy_table("regional", "placeholder", "b", 10);
    integration.rules.source = SourceSpec::Table {
        schema: Some("public".into()),
        table: "customers_${region}".into(),
    };
    let operation = Operation::new("regional")
        .with_parameter("region", "emea")
        .with_integration(integration);
    engine.run(operation).await?;

    let lifecycle: Vec<_> = recorder
        .messages()
        .into_iter()
        .filter(|m| m.event.is_lifecycle())
        .collect();
    assert_eq!(lifecycle.len(), 3);

    let initialized = lifecycle[0].payload.definition.clone().unwrap();
    assert_eq!(lifecycle[0].event, EventName::Initialized);
    assert!(matches!(
        &initialized.integrations[0].rules.source,
        SourceSpec::Table { table, .. } if table == "customers_emea"
    ));
    for message in &lifecycle[1..] {
        let definition = message.payload.definition.as_ref().unwrap();
        assert!(Arc::ptr_eq(definition, &initialized), "{:?}", message.event);
    }
    Ok(())
}

#[tokio::test]
async fn test_table_pages_follow_primary_key() -> Result<()> {
    let db = MemoryDatabase::new();
    let mut rows = customers(30);
    rows.reverse();
    db.seed("a", rows);
    let engine = builder(&db).build()?;

    engine
        .run(Operation::new("ordered").with_integration(copy_table("ordered", "a", "b", 10)))
        .await?;

    let ids: Vec<_> = db
        .rows("b")
        .iter()
        .filter_map(|row| row.get_by_name("id").and_then(Value::as_i64))
        .collect();
    assert_eq!(ids, (1..=30).collect::<Vec<_>>());

    let pages = db.page_queries();
    assert_eq!(pages.len(), 3);
    assert!(
        pages.iter().all(|sql| sql.contains(r#"OVER (ORDER BY "id")"#)),
        "{pages:?}"
    );
    Ok(())
}

#[tokio::test]
async fn test_parallel_lanes_copy_every_page() -> Result<()> {
    let db = MemoryDatabase::new();
    db.seed("a", customers(100));
    let engine = builder(&db).build()?;
    let recorder = Recorder::attach(&engine);

    let mut integration = copy_table("fanout", "a", "b", 10);
    integration.rules.process_count = Some(3);
    let report = engine
        .run(Operation::new("parallel").with_integration(integration))
        .await?;

    assert_eq!(report.rows, 100);
    let mut ids: Vec<_> = db
        .rows("b")
        .iter()
        .filter_map(|row| row.get_by_name("id").and_then(Value::as_i64))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=100).collect::<Vec<_>>());

    // Three source and three target sessions
    assert_eq!(db.connects(), 6);
    assert_eq!(db.open_sessions(), 0);

    let mut progress: Vec<_> = recorder
        .messages()
        .into_iter()
        .filter(|m| m.event == EventName::Log)
        .filter_map(|m| m.payload.row_count)
        .collect();
    assert_eq!(progress.len(), 11);
    progress.sort_unstable();
    assert_eq!(progress.last(), Some(&100));
    Ok(())
}

#[tokio::test]
async fn test_missing_source_table_fails_the_operation() -> Result<()> {
    let db = MemoryDatabase::new();
    let engine = builder(&db).build()?;
    let recorder = Recorder::attach(&engine);

    let err = engine
        .run(Operation::new("broken").with_integration(copy_table("x", "missing", "b", 10)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Database(_)), "{err}");

    let finished = recorder.messages().pop().unwrap();
    assert_eq!(finished.error.map(|e| e.kind), Some(ErrorKind::Database));
    assert_eq!(db.open_sessions(), 0);
    Ok(())
}
