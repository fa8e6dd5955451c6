//! Operation model
//!
//! An [`Operation`] is an ordered list of [`Integration`]s, each moving rows
//! from one connector to another under a set of [`TransferRules`].
//!
//! ```yaml
//! name: nightly-sync
//! parameters:
//!   region: emea
//! integrations:
//!   - name: customers
//!     source: { type: sql, vendor: postgres, server: { host: crm }, auth: { user: etl }, database: crm }
//!     target: { type: sql, vendor: mysql, server: { host: dwh }, auth: { user: etl }, database: dwh }
//!     rules:
//!       source: { schema: public, table: customers }
//!       target: { table: customers }
//!       batch_size: 500
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use validator::Validate;

use crate::config::{from_yaml, read_file, validation_error, ConnectorConfig};
use crate::error::{EngineError, Result};

/// Where rows are read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SourceSpec {
    /// Whole table
    Table {
        /// Schema, unqualified when unset
        #[serde(default)]
        schema: Option<String>,
        /// Table name
        table: String,
    },
    /// Free-form single SELECT statement
    Query {
        /// Query text
        query: String,
    },
}

/// Where rows are written to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum TargetSpec {
    /// Relational table
    Table {
        /// Schema, unqualified when unset
        #[serde(default)]
        schema: Option<String>,
        /// Table name
        table: String,
    },
    /// SOAP service operation receiving one row element per record
    Soap {
        /// Operation (element) name
        operation: String,
    },
}

impl TargetSpec {
    /// Table name or SOAP operation, for logs
    pub fn describe(&self) -> String {
        match self {
            Self::Table {
                schema: Some(schema),
                table,
            } => format!("{}.{}", schema, table),
            Self::Table { schema: None, table } => table.clone(),
            Self::Soap { operation } => operation.clone(),
        }
    }
}

/// Source column copied to a target column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, JsonSchema)]
pub struct ColumnMapping {
    /// Source column
    #[validate(length(min = 1))]
    pub source: String,
    /// Target column
    #[validate(length(min = 1))]
    pub target: String,
}

impl ColumnMapping {
    /// Mapping between two columns
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// How rows move within one integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, JsonSchema)]
pub struct TransferRules {
    /// Rows to read
    pub source: SourceSpec,

    /// Destination
    pub target: TargetSpec,

    /// Column mapping; empty copies every source column under its own name
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,

    /// Rows per page, engine default when unset
    #[serde(default)]
    #[validate(range(min = 1, max = 100000))]
    pub batch_size: Option<u32>,

    /// Empty the target table before loading
    #[serde(default)]
    pub truncate_target: bool,

    /// Upper bound on copying one page, engine default when unset
    #[serde(default)]
    #[validate(range(min = 1))]
    pub page_timeout_ms: Option<u64>,

    /// Source/target session pairs copying pages concurrently, one when unset
    #[serde(default)]
    #[validate(range(min = 1, max = 32))]
    pub process_count: Option<u32>,
}

impl TransferRules {
    /// Rules copying every column from `source` to `target`
    pub fn new(source: SourceSpec, target: TargetSpec) -> Self {
        Self {
            source,
            target,
            columns: Vec::new(),
            batch_size: None,
            truncate_target: false,
            page_timeout_ms: None,
            process_count: None,
        }
    }

    /// Set the page size
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Add a column mapping
    pub fn with_column(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.columns.push(ColumnMapping::new(source, target));
        self
    }

    /// Truncate the target first
    pub fn with_truncate(mut self) -> Self {
        self.truncate_target = true;
        self
    }

    /// Bound each page copy
    pub fn with_page_timeout(mut self, ms: u64) -> Self {
        self.page_timeout_ms = Some(ms);
        self
    }

    /// Copy pages over `count` session pairs
    pub fn with_process_count(mut self, count: u32) -> Self {
        self.process_count = Some(count);
        self
    }

    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| validation_error("transfer rules", e))?;
        for mapping in &self.columns {
            mapping
                .validate()
                .map_err(|e| validation_error("column mapping", e))?;
        }
        let mut seen = HashSet::new();
        for mapping in &self.columns {
            if !seen.insert(mapping.target.to_ascii_lowercase()) {
                return Err(EngineError::config(format!(
                    "target column '{}' is mapped more than once",
                    mapping.target
                )));
            }
        }
        Ok(())
    }
}

/// One source-to-target transfer
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct Integration {
    /// Unique name within the operation
    #[validate(length(min = 1))]
    pub name: String,

    /// Read side
    pub source: ConnectorConfig,

    /// Write side
    pub target: ConnectorConfig,

    /// Transfer rules
    pub rules: TransferRules,
}

impl Integration {
    /// Create an integration
    pub fn new(
        name: impl Into<String>,
        source: ConnectorConfig,
        target: ConnectorConfig,
        rules: TransferRules,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            rules,
        }
    }

    /// Validate every nested section
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| validation_error("integration", e))?;
        self.source.check()?;
        self.target.check()?;
        self.rules.check()
    }
}

/// Top-level unit of work
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Operation {
    /// Operation name
    pub name: String,

    /// Integrations, executed in order
    pub integrations: Vec<Integration>,

    /// Named values available to initializers
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Operation {
    /// Create an empty operation
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            integrations: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Append an integration
    pub fn with_integration(mut self, integration: Integration) -> Self {
        self.integrations.push(integration);
        self
    }

    /// Set a parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Parse a YAML document after environment expansion
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        from_yaml(content)
    }

    /// Load a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml_str(&read_file(path.as_ref())?)
    }

    /// Reject operations that cannot run.
    ///
    /// Every failure is reported as [`EngineError::InvalidOperation`].
    pub fn validate_operation(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid_operation("operation name is empty"));
        }
        if self.integrations.is_empty() {
            return Err(EngineError::invalid_operation(format!(
                "operation '{}' has no integrations",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for integration in &self.integrations {
            if !names.insert(integration.name.as_str()) {
                return Err(EngineError::invalid_operation(format!(
                    "duplicate integration name '{}'",
                    integration.name
                )));
            }
            integration.check().map_err(|e| {
                EngineError::invalid_operation(format!(
                    "integration '{}': {}",
                    integration.name, e
                ))
            })?;
        }
        Ok(())
    }
}
