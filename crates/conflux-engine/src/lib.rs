//! # conflux-engine
//!
//! Execution engine for data-integration operations.
//!
//! An [`Operation`](operation::Operation) is an ordered list of integrations,
//! each moving rows from a source connector to a target connector under a set
//! of transfer rules. The engine runs the integrations one after another,
//! stops at the first fatal error and reports its lifecycle to subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Engine  (validate, resolve initializer, per-run broker)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Orchestrator  INITIALIZED -> STARTED -> FINISHED             │
//! │   └── Scheduler  (sequential work list, stop at failure)     │
//! │         └── TransferExecutor  (count, page, write)           │
//! │               └── Connector  (postgres, mysql, soap)         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ EventBroker  queue, callbacks delivered at join()            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use conflux_engine::prelude::*;
//!
//! let engine = Engine::new(EngineConfig::from_file("engine.yaml")?)?;
//! engine.subscribe(EventName::Finished, |message| {
//!     match &message.error {
//!         Some(error) => eprintln!("failed: {error}"),
//!         None => println!("done"),
//!     }
//! });
//!
//! let operation = Operation::from_file("nightly.yaml")?;
//! let report = engine.run(operation).await?;
//! println!("{} rows", report.rows);
//! ```
//!
//! # Events
//!
//! | Event | When | Payload |
//! |-------|------|---------|
//! | `INITIALIZED` | initializer applied | operation |
//! | `STARTED` | before the first integration | operation |
//! | `INTEGRATION_STARTED` | before each integration | operation, integration |
//! | `LOG` | after each written page | operation, integration, rows |
//! | `INTEGRATION_FINISHED` | after each integration | operation, integration, rows |
//! | `FINISHED` | once, terminal | operation, error on failure |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod events;
pub mod initializer;
pub mod operation;
pub mod orchestrator;
pub mod scheduler;
pub mod telemetry;
pub mod transfer;

pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, ErrorKind, OperationAborted, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{EngineError, ErrorKind, OperationAborted, Result};

    pub use crate::engine::{Engine, EngineBuilder};

    pub use crate::config::{
        AuthConfig, ConnectorConfig, EngineConfig, SensitiveString, ServerConfig,
        SoapConnectorConfig, SoapSettings, SqlConnectorConfig, SqlVendor,
    };

    pub use crate::operation::{
        ColumnMapping, Integration, Operation, SourceSpec, TargetSpec, TransferRules,
    };

    pub use crate::events::{EventName, EventPayload, TaskMessage};

    pub use crate::broker::{EventBroker, Publisher, SubscriptionId, Subscriptions};

    pub use crate::initializer::{
        DefaultInitializer, Initializer, InitializerRegistry, ParameterInitializer,
    };

    pub use crate::connector::{
        Connector, ConnectorContext, ConnectorFactory, ConnectorKind, ConnectorRegistry,
        QueryIndexer, SoapConnector, SqlConnector, SqlEngine, WriteStatement,
    };

    pub use crate::orchestrator::{OperationOutcome, OperationReport, OperationState, Orchestrator};

    pub use crate::scheduler::{
        IntegrationState, ScheduleReport, Scheduler, SequentialScheduler, WorkItem,
    };

    pub use crate::transfer::{PagedTransferExecutor, TransferExecutor, TransferSummary};

    pub use crate::telemetry::{init_tracing, LogFormat, TelemetryConfig};
}
