//! Logging setup and span helpers
//!
//! The engine logs through `tracing`. Embedding applications usually install
//! their own subscriber; [`init_tracing`] is offered for binaries and tests
//! that want the engine's defaults.
//!
//! # Example
//!
//! ```rust,ignore
//! use conflux_engine::telemetry::{init_tracing, LogFormat, TelemetryConfig};
//!
//! init_tracing(&TelemetryConfig {
//!     level: "conflux_engine=debug".into(),
//!     format: LogFormat::Json,
//!     ..Default::default()
//! })?;
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{EngineError, Result};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Include the event target (module path)
    #[serde(default = "default_true")]
    pub with_target: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Filter from `RUST_LOG`, falling back to `level`
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level).map_err(|e| {
                EngineError::config(format!("invalid log level '{}': {}", self.level, e))
            }),
        }
    }
}

/// Install a global fmt subscriber.
///
/// Fails if the filter is invalid or a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let filter = config.env_filter()?;

    let (json, pretty) = match config.format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target),
            ),
            None,
        ),
        LogFormat::Pretty => (
            None,
            Some(tracing_subscriber::fmt::layer().with_target(config.with_target)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| EngineError::config(format!("failed to install subscriber: {}", e)))
}

/// Span covering one operation run
pub fn operation_span(operation: &str, integrations: usize) -> Span {
    tracing::info_span!("operation.run", operation = operation, integrations = integrations)
}

/// Span covering one integration
pub fn integration_span(operation: &str, integration: &str, position: usize) -> Span {
    tracing::info_span!(
        "integration.run",
        operation = operation,
        integration = integration,
        position = position,
    )
}

/// Span covering one page of a transfer
pub fn batch_span(integration: &str, start: u64, end: u64) -> Span {
    tracing::debug_span!("transfer.batch", integration = integration, start = start, end = end)
}
