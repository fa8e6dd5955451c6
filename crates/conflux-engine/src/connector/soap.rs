//! SOAP web service connector
//!
//! Write-only. Each batch becomes one envelope posted to the service
//! endpoint:
//!
//! ```xml
//! <soapenv:Envelope xmlns:soapenv="..." xmlns:xsi="..." xmlns:tns="urn:erp">
//!   <soapenv:Header/>
//!   <soapenv:Body>
//!     <tns:ImportCustomers>
//!       <tns:row><tns:id>1</tns:id><tns:name>Ada</tns:name></tns:row>
//!     </tns:ImportCustomers>
//!   </soapenv:Body>
//! </soapenv:Envelope>
//! ```
//!
//! Whether the batch is applied atomically is up to the service. An HTTP
//! error status or a `Fault` element in the response fails the batch.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conflux_rdbc::types::Value;

use super::registry::{ConnectorContext, ConnectorFactory};
use super::{cancellable, Connector, ConnectorKind, QueryIndexer, WriteStatement};
use crate::config::{ConnectorConfig, SoapConnectorConfig};
use crate::error::{EngineError, Result};
use crate::operation::TargetSpec;

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Longest response excerpt carried in an error message
const MAX_ERROR_BODY_CHARS: usize = 512;

static XML_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("Invalid XML name regex - this is a bug")
});

static FAULT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:[A-Za-z_][\w.\-]*:)?Fault[\s>/]").expect("Invalid fault regex - this is a bug")
});

static FAULT_STRING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z_][\w.\-]*:)?(?:faultstring|Text)\b[^>]*>(.*?)</")
        .expect("Invalid faultstring regex - this is a bug")
});

/// Whether XML 1.0 can carry `c` at all, escaped or not
fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
    )
}

/// Escape text for use in element content or attribute values.
///
/// Fails on characters XML 1.0 cannot represent, such as NUL or other
/// control characters.
pub(crate) fn escape_xml(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if !is_xml_char(c) => {
                return Err(EngineError::transfer(format!(
                    "character U+{:04X} cannot be sent in an XML 1.0 document",
                    u32::from(c)
                )))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn check_xml_name(kind: &str, name: &str) -> Result<()> {
    if XML_NAME_REGEX.is_match(name) && !name.to_ascii_lowercase().starts_with("xml") {
        Ok(())
    } else {
        Err(EngineError::config(format!("invalid SOAP {kind} name '{name}'")))
    }
}

/// Build the request envelope for one batch
pub(crate) fn build_envelope(
    namespace: &str,
    operation: &str,
    columns: &[String],
    rows: &[Vec<Value>],
) -> Result<String> {
    let mut body = String::with_capacity(256 + rows.len() * columns.len() * 32);
    body.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    body.push_str(&format!(
        r#"<soapenv:Envelope xmlns:soapenv="{}" xmlns:xsi="{}" xmlns:tns="{}">"#,
        SOAP_ENVELOPE_NS,
        XSI_NS,
        escape_xml(namespace)?
    ));
    body.push_str("<soapenv:Header/><soapenv:Body>");
    body.push_str(&format!("<tns:{operation}>"));
    for row in rows {
        body.push_str("<tns:row>");
        for (column, value) in columns.iter().zip(row) {
            match value.to_text() {
                Some(text) => {
                    let text = escape_xml(&text).map_err(|e| {
                        EngineError::transfer(format!("column '{column}': {}", transfer_message(e)))
                    })?;
                    body.push_str(&format!("<tns:{column}>{text}</tns:{column}>"))
                }
                None => body.push_str(&format!(r#"<tns:{column} xsi:nil="true"/>"#)),
            }
        }
        body.push_str("</tns:row>");
    }
    body.push_str(&format!("</tns:{operation}>"));
    body.push_str("</soapenv:Body></soapenv:Envelope>");
    Ok(body)
}

fn transfer_message(error: EngineError) -> String {
    match error {
        EngineError::Transfer(message) => message,
        other => other.to_string(),
    }
}

/// Fault message if `body` is a SOAP Fault
pub(crate) fn parse_fault(body: &str) -> Option<String> {
    if !FAULT_REGEX.is_match(body) {
        return None;
    }
    let message = FAULT_STRING_REGEX
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "SOAP Fault".to_string());
    Some(message)
}

fn excerpt(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{cut}...")
    } else {
        body.to_string()
    }
}

/// Connector that writes batches to a SOAP operation
pub struct SoapConnector {
    label: String,
    config: SoapConnectorConfig,
    connect_timeout: Duration,
    client: Option<reqwest::Client>,
}

impl std::fmt::Debug for SoapConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapConnector")
            .field("label", &self.label)
            .field("endpoint", &self.config.endpoint_url())
            .field("connected", &self.client.is_some())
            .finish()
    }
}

impl SoapConnector {
    /// Create an unconnected connector
    pub fn new(label: impl Into<String>, config: SoapConnectorConfig, connect_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            config,
            connect_timeout,
            client: None,
        }
    }

    /// Connector configuration
    pub fn config(&self) -> &SoapConnectorConfig {
        &self.config
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            Some(auth) => {
                let password = (!auth.password.is_empty()).then(|| auth.password.expose_secret());
                builder.basic_auth(&auth.user, password)
            }
            None => builder,
        }
    }

    fn soap_action(&self, operation: &str) -> String {
        format!(
            "{}/{}",
            self.config.soap.namespace.trim_end_matches('/'),
            operation
        )
    }

    async fn post(&self, client: &reqwest::Client, operation: &str, envelope: String) -> Result<()> {
        let response = self
            .with_auth(client.post(self.config.endpoint_url()))
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{}\"", self.soap_action(operation)))
            .body(envelope)
            .send()
            .await
            .map_err(|e| EngineError::transfer(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Some(fault) = parse_fault(&body) {
            return Err(EngineError::transfer(format!("SOAP Fault: {fault}")));
        }
        if !status.is_success() {
            return Err(EngineError::transfer(format!(
                "HTTP {}: {}",
                status.as_u16(),
                excerpt(&body)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for SoapConnector {
    fn name(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Soap
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.client.is_some() {
            return Err(EngineError::AlreadyConnected(self.label.clone()));
        }
        if !self.config.ssl && self.config.auth.is_some() {
            warn!(
                connector = %self.label,
                "SOAP service uses plain HTTP, credentials will be sent in cleartext"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.config.soap.timeout_ms))
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| EngineError::connection_with_source(self.label.clone(), e))?;

        let wsdl = self.config.wsdl_url();
        info!(connector = %self.label, wsdl = %wsdl, "Loading service description");
        let request = self.with_auth(client.get(&wsdl));
        let response = cancellable(cancel, async {
            request
                .send()
                .await
                .map_err(|e| EngineError::connection_with_source(self.label.clone(), e))
        })
        .await?;

        if !response.status().is_success() {
            return Err(EngineError::connection(
                self.label.clone(),
                format!("WSDL request to {} returned HTTP {}", wsdl, response.status().as_u16()),
            ));
        }

        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            debug!(connector = %self.label, "Disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn query_indexer(&self) -> QueryIndexer {
        QueryIndexer::Named
    }

    fn write_statement(&self, target: &TargetSpec, columns: &[String]) -> Result<WriteStatement> {
        let operation = match target {
            TargetSpec::Soap { operation } => operation,
            TargetSpec::Table { .. } => {
                return Err(EngineError::config(format!(
                    "SOAP connector '{}' cannot write to table {}",
                    self.label,
                    target.describe()
                )))
            }
        };
        check_xml_name("operation", operation)?;
        if columns.is_empty() {
            return Err(EngineError::config(format!(
                "no columns to send to SOAP operation '{operation}'"
            )));
        }
        for column in columns {
            check_xml_name("element", column)?;
        }
        Ok(WriteStatement {
            text: operation.clone(),
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
        let client = self
            .client
            .clone()
            .ok_or_else(|| EngineError::NotConnected(self.label.clone()))?;

        let sent = match build_envelope(
            &self.config.soap.namespace,
            &statement.text,
            &statement.columns,
            rows,
        ) {
            Ok(envelope) => {
                debug!(
                    connector = %self.label,
                    operation = %statement.text,
                    rows = rows.len(),
                    bytes = envelope.len(),
                    "Sending envelope"
                );
                cancellable(cancel, self.post(&client, &statement.text, envelope)).await
            }
            Err(e) => Err(e),
        };

        // A failed batch closes the session; the transfer stops anyway
        match sent {
            Ok(()) => Ok(rows.len() as u64),
            Err(e) => {
                self.disconnect().await;
                if e.is_cancelled() {
                    return Err(e);
                }
                warn!(connector = %self.label, rows = rows.len(), "Batch failed: {}", e);
                Err(EngineError::batch_write(
                    self.label.clone(),
                    rows.len(),
                    transfer_message(e),
                ))
            }
        }
    }
}

/// Builds [`SoapConnector`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct SoapConnectorFactory;

impl ConnectorFactory for SoapConnectorFactory {
    fn create(
        &self,
        config: &ConnectorConfig,
        context: &ConnectorContext,
    ) -> Result<Box<dyn Connector>> {
        match config {
            ConnectorConfig::Soap(soap) => Ok(Box::new(SoapConnector::new(
                context.label.clone(),
                soap.clone(),
                context.connect_timeout,
            ))),
            other => Err(EngineError::config(format!(
                "SOAP connector cannot serve a '{}' configuration",
                other.connector_type()
            ))),
        }
    }
}
