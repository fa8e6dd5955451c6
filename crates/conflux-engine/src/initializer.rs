//! Pre-execution hooks
//!
//! An [`Initializer`] rewrites an [`Operation`] once, before any event is
//! published. Exactly one initializer is active per run; the
//! [`InitializerRegistry`] decides which.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::operation::{Operation, SourceSpec, TargetSpec};

/// Name under which [`DefaultInitializer`] is always selectable
pub const DEFAULT_INITIALIZER: &str = "default";

/// Transform applied to an operation before it runs
pub trait Initializer: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Produce the operation that will run
    fn initialize(&self, operation: Operation) -> Result<Operation>;
}

/// Returns the operation unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInitializer;

impl Initializer for DefaultInitializer {
    fn name(&self) -> &str {
        DEFAULT_INITIALIZER
    }

    fn initialize(&self, operation: Operation) -> Result<Operation> {
        Ok(operation)
    }
}

static PARAMETER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}")
        .expect("parameter regex pattern is invalid - this is a bug")
});

/// Substitutes `${name}` with values from [`Operation::parameters`].
///
/// Applies to source queries, schema and table names of both sides, and SOAP
/// operation names. Placeholders without a matching parameter are kept.
#[derive(Debug, Clone, Default)]
pub struct ParameterInitializer {
    defaults: BTreeMap<String, String>,
}

impl ParameterInitializer {
    /// Registry name
    pub const NAME: &'static str = "parameters";

    /// Initializer using only the operation's own parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Value used when the operation does not define `key`
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    fn expand(text: &str, parameters: &BTreeMap<String, String>) -> String {
        PARAMETER_REGEX
            .replace_all(text, |caps: &regex::Captures| {
                parameters
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn expand_opt(text: &mut Option<String>, parameters: &BTreeMap<String, String>) {
        if let Some(value) = text {
            *value = Self::expand(value, parameters);
        }
    }
}

impl Initializer for ParameterInitializer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&self, mut operation: Operation) -> Result<Operation> {
        let mut parameters = self.defaults.clone();
        parameters.extend(operation.parameters.clone());

        for integration in &mut operation.integrations {
            match &mut integration.rules.source {
                SourceSpec::Table { schema, table } => {
                    Self::expand_opt(schema, &parameters);
                    *table = Self::expand(table, &parameters);
                }
                SourceSpec::Query { query } => {
                    *query = Self::expand(query, &parameters);
                }
            }
            match &mut integration.rules.target {
                TargetSpec::Table { schema, table } => {
                    Self::expand_opt(schema, &parameters);
                    *table = Self::expand(table, &parameters);
                }
                TargetSpec::Soap { operation } => {
                    *operation = Self::expand(operation, &parameters);
                }
            }
        }

        debug!(
            operation = %operation.name,
            parameters = parameters.len(),
            "Expanded operation parameters"
        );
        Ok(operation)
    }
}

/// Explicit set of initializers with a built-in default.
///
/// Selection rules for [`get`](Self::get):
///
/// | selection | registered custom | result |
/// |-----------|-------------------|--------|
/// | `Some(name)` | any | that initializer, or a configuration error |
/// | `None` | 0 | [`DefaultInitializer`] |
/// | `None` | 1 | the registered one |
/// | `None` | 2+ | [`EngineError::InitializerAmbiguity`] |
#[derive(Clone)]
pub struct InitializerRegistry {
    custom: BTreeMap<String, Arc<dyn Initializer>>,
    default: Arc<dyn Initializer>,
}

impl Default for InitializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InitializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializerRegistry")
            .field("custom", &self.names())
            .finish()
    }
}

impl InitializerRegistry {
    /// Registry holding only the default
    pub fn new() -> Self {
        Self {
            custom: BTreeMap::new(),
            default: Arc::new(DefaultInitializer),
        }
    }

    /// Register `initializer` under `name`, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, initializer: Arc<dyn Initializer>) {
        self.custom.insert(name.into(), initializer);
    }

    /// Builder form of [`register`](Self::register), keyed by the initializer's own name
    pub fn with(mut self, initializer: Arc<dyn Initializer>) -> Self {
        let name = initializer.name().to_string();
        self.register(name, initializer);
        self
    }

    /// Names of custom initializers, sorted
    pub fn names(&self) -> Vec<&str> {
        self.custom.keys().map(String::as_str).collect()
    }

    /// Resolve the initializer for a run
    pub fn get(&self, selection: Option<&str>) -> Result<Arc<dyn Initializer>> {
        if let Some(name) = selection {
            if let Some(initializer) = self.custom.get(name) {
                return Ok(initializer.clone());
            }
            if name == DEFAULT_INITIALIZER {
                return Ok(self.default.clone());
            }
            return Err(EngineError::config(format!(
                "initializer '{}' is not registered (available: {})",
                name,
                self.names().join(", ")
            )));
        }

        let mut custom = self.custom.values();
        match (custom.next(), custom.next()) {
            (None, _) => Ok(self.default.clone()),
            (Some(only), None) => Ok(only.clone()),
            _ => Err(EngineError::InitializerAmbiguity {
                candidates: self.custom.keys().cloned().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, ConnectorConfig, SensitiveString, ServerConfig, SqlConnectorConfig, SqlVendor};
    use crate::operation::{Integration, TransferRules};

    struct Named(&'static str);

    impl Initializer for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn initialize(&self, operation: Operation) -> Result<Operation> {
            Ok(operation)
        }
    }

    fn sql() -> ConnectorConfig {
        ConnectorConfig::Sql(SqlConnectorConfig {
            vendor: SqlVendor::Postgres,
            server: ServerConfig {
                host: "db".into(),
                port: None,
            },
            auth: AuthConfig {
                user: "etl".into(),
                password: SensitiveString::new(""),
            },
            database: "app".into(),
            ssl: false,
            max_connections: 1,
            query_timeout_ms: 0,
        })
    }

    fn operation(source: SourceSpec, target: TargetSpec) -> Operation {
        Operation::new("op").with_integration(Integration::new(
            "i",
            sql(),
            sql(),
            TransferRules::new(source, target),
        ))
    }

    #[test]
    fn test_default_is_identity() {
        let op = operation(
            SourceSpec::Query {
                query: "SELECT ${x}".into(),
            },
            TargetSpec::Soap {
                operation: "Op".into(),
            },
        );
        let out = DefaultInitializer.initialize(op.clone()).unwrap();
        assert_eq!(out.integrations[0].rules, op.integrations[0].rules);
    }

    #[test]
    fn test_parameters_expand_queries_and_names() {
        let op = operation(
            SourceSpec::Query {
                query: "SELECT * FROM orders WHERE region = '${region}' AND y = ${unknown}".into(),
            },
            TargetSpec::Table {
                schema: Some("${schema}".into()),
                table: "orders_${region}".into(),
            },
        )
        .with_parameter("region", "emea");

        let init = ParameterInitializer::new().with_default("schema", "staging");
        let out = init.initialize(op).unwrap();
        let rules = &out.integrations[0].rules;

        assert_eq!(
            rules.source,
            SourceSpec::Query {
                query: "SELECT * FROM orders WHERE region = 'emea' AND y = ${unknown}".into()
            }
        );
        assert_eq!(
            rules.target,
            TargetSpec::Table {
                schema: Some("staging".into()),
                table: "orders_emea".into()
            }
        );
    }

    #[test]
    fn test_operation_parameters_override_defaults() {
        let op = operation(
            SourceSpec::Table {
                schema: None,
                table: "t_${v}".into(),
            },
            TargetSpec::Soap {
                operation: "Import${v}".into(),
            },
        )
        .with_parameter("v", "2");
        let out = ParameterInitializer::new()
            .with_default("v", "1")
            .initialize(op)
            .unwrap();
        assert_eq!(
            out.integrations[0].rules.target,
            TargetSpec::Soap {
                operation: "Import2".into()
            }
        );
    }

    #[test]
    fn test_registry_resolution() {
        let empty = InitializerRegistry::new();
        assert_eq!(empty.get(None).unwrap().name(), DEFAULT_INITIALIZER);

        let one = InitializerRegistry::new().with(Arc::new(ParameterInitializer::new()));
        assert_eq!(one.get(None).unwrap().name(), "parameters");
        assert_eq!(one.get(Some("default")).unwrap().name(), DEFAULT_INITIALIZER);

        let two = one.clone().with(Arc::new(Named("audit")));
        match two.get(None) {
            Err(EngineError::InitializerAmbiguity { candidates }) => {
                assert_eq!(candidates, vec!["audit", "parameters"]);
            }
            other => panic!("expected ambiguity, got {:?}", other.map(|i| i.name().to_string())),
        }
        assert_eq!(two.get(Some("audit")).unwrap().name(), "audit");
        assert!(matches!(
            two.get(Some("missing")),
            Err(EngineError::Configuration(_))
        ));
    }
}
