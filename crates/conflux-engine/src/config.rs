//! Configuration types for conflux-engine
//!
//! Two layers of configuration exist:
//!
//! - [`EngineConfig`]: engine-wide settings (event channel size, initializer
//!   selection, default batch size, timeouts, logging)
//! - [`ConnectorConfig`]: how one integration reaches its source or target
//!
//! YAML documents pass through `${VAR}` / `${VAR:-default}` environment
//! expansion before parsing.

use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use validator::Validate;

use conflux_rdbc::connection::DatabaseType;

use crate::error::{EngineError, Result};
use crate::telemetry::TelemetryConfig;

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Expand `${VAR}` and `${VAR:-default}` from the process environment.
///
/// A variable that is unset and has no default is left as written, so
/// operation parameters using the same `${name}` syntax survive loading.
pub fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match (std::env::var(var_name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Deserialize a YAML document after environment expansion
pub(crate) fn from_yaml<T: serde::de::DeserializeOwned>(content: &str) -> Result<T> {
    let expanded = expand_env_vars(content);
    serde_yaml::from_str(&expanded)
        .map_err(|e| EngineError::config(format!("failed to parse YAML: {}", e)))
}

pub(crate) fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        EngineError::config(format!("failed to read {}: {}", path.display(), e))
    })
}

pub(crate) fn validation_error(what: &str, errors: validator::ValidationErrors) -> EngineError {
    EngineError::config(format!("{} validation failed: {}", what, errors))
}

// ---------------------------------------------------------------------------
// SensitiveString
// ---------------------------------------------------------------------------

/// A string that never shows up in logs.
///
/// `Debug` and `Display` print `[REDACTED]`; serialization writes
/// `***REDACTED***`. Deserialization reads the real value.
///
/// ```rust
/// use conflux_engine::config::SensitiveString;
///
/// let password = SensitiveString::new("hunter2");
/// assert_eq!(format!("{:?}", password), "[REDACTED]");
/// assert_eq!(password.expose_secret(), "hunter2");
/// ```
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Wrap a value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// The wrapped value, for authentication only
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the wrapped value is empty
    pub fn is_empty(&self) -> bool {
        self.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "SensitiveString".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
            obj.metadata().description =
                Some("Secret value, redacted in logs and serialized output".to_string());
        }
        schema
    }
}

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct EngineConfig {
    /// Event messages a run is expected to queue before delivery; more are
    /// kept, with a warning
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1, max = 65536))]
    pub channel_capacity: usize,

    /// Name of the initializer to apply; unset means "the only one registered"
    #[serde(default)]
    pub initializer: Option<String>,

    /// Rows per page when an integration does not set `batch_size`
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 100000))]
    pub default_batch_size: u32,

    /// Timeout for opening a connector session
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    /// Upper bound on copying one page when an integration does not set
    /// `page_timeout_ms`
    #[serde(default = "default_page_timeout_ms")]
    #[validate(range(min = 1))]
    pub page_timeout_ms: u64,

    /// Logging setup
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_batch_size() -> u32 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_page_timeout_ms() -> u64 {
    1_800_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            initializer: None,
            default_batch_size: default_batch_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            page_timeout_ms: default_page_timeout_ms(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = from_yaml(content)?;
        config.check()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml_str(&read_file(path.as_ref())?)
    }

    /// Run field validation
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| validation_error("engine config", e))
    }

    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default page timeout as a `Duration`
    pub fn page_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.page_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Connector configuration
// ---------------------------------------------------------------------------

/// Host and port of a backend
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct ServerConfig {
    /// Hostname or IP address
    #[validate(length(min = 1))]
    pub host: String,

    /// Port, the vendor default when unset
    #[serde(default)]
    pub port: Option<u16>,
}

/// Credentials
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct AuthConfig {
    /// User name
    #[validate(length(min = 1))]
    pub user: String,

    /// Password
    #[serde(default = "empty_secret")]
    pub password: SensitiveString,
}

fn empty_secret() -> SensitiveString {
    SensitiveString::new("")
}

/// Relational backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SqlVendor {
    /// PostgreSQL
    Postgres,
    /// MySQL / MariaDB
    Mysql,
}

impl SqlVendor {
    /// Registry key and URL scheme
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }

    /// Matching relational backend
    pub const fn database_type(self) -> DatabaseType {
        match self {
            Self::Postgres => DatabaseType::PostgreSQL,
            Self::Mysql => DatabaseType::MySQL,
        }
    }
}

/// A relational database endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct SqlConnectorConfig {
    /// Backend vendor
    pub vendor: SqlVendor,

    /// Server address
    pub server: ServerConfig,

    /// Credentials
    pub auth: AuthConfig,

    /// Database name
    #[validate(length(min = 1))]
    pub database: String,

    /// Negotiate TLS
    #[serde(default)]
    pub ssl: bool,

    /// Upper bound on sessions opened through [`crate::connector::SqlEngine`]
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1, max = 64))]
    pub max_connections: u32,

    /// Upper bound on one statement in milliseconds, `0` leaves statements
    /// bounded only by the page timeout
    #[serde(default)]
    pub query_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    4
}

impl SqlConnectorConfig {
    /// Port, falling back to the vendor default
    pub fn port(&self) -> u16 {
        self.server
            .port
            .unwrap_or_else(|| self.vendor.database_type().default_port())
    }

    /// Driver URL including credentials
    pub fn url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!(
            "{}://{}",
            self.vendor.as_str(),
            self.server.host
        ))
        .map_err(|e| EngineError::config(format!("invalid host '{}': {}", self.server.host, e)))?;

        let invalid = |_| EngineError::config("URL cannot carry credentials or port");
        url.set_username(&self.auth.user).map_err(invalid)?;
        if !self.auth.password.is_empty() {
            url.set_password(Some(self.auth.password.expose_secret()))
                .map_err(invalid)?;
        }
        url.set_port(Some(self.port())).map_err(invalid)?;
        url.set_path(&self.database);
        Ok(url)
    }

    /// `host:port/database`, safe for logs
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.server.host, self.port(), self.database)
    }

    fn check(&self) -> Result<()> {
        self.validate()
            .and_then(|_| self.server.validate())
            .and_then(|_| self.auth.validate())
            .map_err(|e| validation_error("sql connector", e))
    }
}

/// SOAP service settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct SoapSettings {
    /// WSDL location, absolute URL or path on the server
    #[validate(length(min = 1))]
    pub wsdl: String,

    /// Service endpoint, absolute URL or path; derived from `wsdl` when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Target namespace of the service operations
    #[validate(length(min = 1))]
    pub namespace: String,

    /// Per-request timeout
    #[serde(default = "default_soap_timeout_ms")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
}

fn default_soap_timeout_ms() -> u64 {
    30_000
}

/// A SOAP web service endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct SoapConnectorConfig {
    /// Server address
    pub server: ServerConfig,

    /// HTTP basic credentials
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Use HTTPS
    #[serde(default)]
    pub ssl: bool,

    /// Service settings
    pub soap: SoapSettings,
}

impl SoapConnectorConfig {
    /// `scheme://host[:port]`
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        match self.server.port {
            Some(port) => format!("{}://{}:{}", scheme, self.server.host, port),
            None => format!("{}://{}", scheme, self.server.host),
        }
    }

    fn resolve(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url(), location.trim_start_matches('/'))
        }
    }

    /// Absolute WSDL URL
    pub fn wsdl_url(&self) -> String {
        self.resolve(&self.soap.wsdl)
    }

    /// Absolute endpoint URL that envelopes are posted to
    pub fn endpoint_url(&self) -> String {
        match &self.soap.endpoint {
            Some(endpoint) => self.resolve(endpoint),
            None => {
                let wsdl = self.wsdl_url();
                match wsdl.to_ascii_lowercase().rfind("?wsdl") {
                    Some(idx) => wsdl[..idx].to_string(),
                    None => wsdl,
                }
            }
        }
    }

    fn check(&self) -> Result<()> {
        let auth = match &self.auth {
            Some(auth) => auth.validate(),
            None => Ok(()),
        };
        self.validate()
            .and_then(|_| self.server.validate())
            .and_then(|_| self.soap.validate())
            .and(auth)
            .map_err(|e| validation_error("soap connector", e))
    }
}

/// How an integration reaches one side of a transfer
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// Relational database
    Sql(SqlConnectorConfig),
    /// SOAP web service
    Soap(SoapConnectorConfig),
}

impl ConnectorConfig {
    /// Registry key of the connector that serves this configuration
    pub fn connector_type(&self) -> &'static str {
        match self {
            Self::Sql(sql) => sql.vendor.as_str(),
            Self::Soap(_) => "soap",
        }
    }

    /// Validate every nested section
    pub fn check(&self) -> Result<()> {
        match self {
            Self::Sql(sql) => sql.check(),
            Self::Soap(soap) => soap.check(),
        }
    }

    /// Endpoint description without credentials
    pub fn describe(&self) -> String {
        match self {
            Self::Sql(sql) => format!("{}://{}", sql.vendor.as_str(), sql.endpoint()),
            Self::Soap(soap) => soap.endpoint_url(),
        }
    }
}
