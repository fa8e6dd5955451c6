//! Input checks for SQL text built by the dialects.
//!
//! Provides:
//! - Identifier validation against a dialect's quote character
//! - String literal escaping for introspection queries
//! - Type name validation for generated DDL
//! - Normalisation of free-form source queries wrapped as subqueries

use crate::error::Error;

/// Longest identifier accepted by any supported backend.
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Validate an identifier that is about to be wrapped in `quote` characters.
///
/// Quoted identifiers may contain spaces, dots and other punctuation, so the
/// only rejected inputs are ones that would break out of the quoting:
/// - empty names
/// - names longer than [`MAX_IDENTIFIER_LEN`]
/// - names containing `quote` or a NUL byte
///
/// # Examples
///
/// ```
/// use conflux_rdbc::security::validate_quoted_identifier;
///
/// assert!(validate_quoted_identifier("order items", '"').is_ok());
/// assert!(validate_quoted_identifier("my`table", '"').is_ok());
///
/// assert!(validate_quoted_identifier("users\"; DROP TABLE x; --", '"').is_err());
/// assert!(validate_quoted_identifier("my`table", '`').is_err());
/// assert!(validate_quoted_identifier("", '"').is_err());
/// ```
pub fn validate_quoted_identifier(name: &str, quote: char) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_identifier(name, "identifier cannot be empty"));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::invalid_identifier(
            name,
            format!(
                "identifier too long: {} chars (max {})",
                name.len(),
                MAX_IDENTIFIER_LEN
            ),
        ));
    }

    if name.contains(quote) {
        return Err(Error::invalid_identifier(
            name,
            format!("contains the quote character '{}'", quote),
        ));
    }

    if name.contains('\0') {
        return Err(Error::invalid_identifier(name, "contains a NUL byte"));
    }

    Ok(())
}

/// Escape a string value for interpolation into a single-quoted SQL literal.
///
/// Only used for `information_schema` lookups, which the dialects return as
/// complete statements.
///
/// ```
/// use conflux_rdbc::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("public"), "public");
/// assert_eq!(escape_string_literal("o'brien"), "o''brien");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

/// Validate a SQL type name for interpolation into `CREATE TABLE`.
///
/// Allows letters, digits, underscores, parentheses, commas, spaces and
/// periods, which covers `VARCHAR(255)`, `NUMERIC(10,2)` and
/// `DOUBLE PRECISION`.
///
/// ```
/// use conflux_rdbc::security::validate_sql_type_name;
///
/// assert!(validate_sql_type_name("DECIMAL(10,2)").is_ok());
/// assert!(validate_sql_type_name("INT; DROP TABLE users--").is_err());
/// ```
pub fn validate_sql_type_name(type_name: &str) -> crate::Result<()> {
    if type_name.is_empty() {
        return Err(Error::config("SQL type name cannot be empty"));
    }

    if type_name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "SQL type name too long: {} chars (max {})",
            type_name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    for c in type_name.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | ',' | ' ' | '.')) {
            return Err(Error::config(format!(
                "Invalid SQL type name '{}': contains invalid character '{}'",
                type_name, c
            )));
        }
    }

    Ok(())
}

/// Prepare a free-form query for use as a subquery.
///
/// Trailing whitespace and semicolons are stripped. Statement stacking (a
/// semicolon anywhere else) is rejected because the result is embedded in
/// `SELECT ... FROM (<query>)`.
///
/// ```
/// use conflux_rdbc::security::normalize_subquery;
///
/// assert_eq!(normalize_subquery("SELECT * FROM a;\n").unwrap(), "SELECT * FROM a");
/// assert!(normalize_subquery("SELECT 1; DELETE FROM a").is_err());
/// assert!(normalize_subquery("  ;").is_err());
/// ```
pub fn normalize_subquery(query: &str) -> crate::Result<&str> {
    let trimmed = query.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        return Err(Error::config("source query cannot be empty"));
    }
    if trimmed.contains(';') {
        return Err(Error::config(
            "source query must be a single statement without ';'",
        ));
    }
    Ok(trimmed)
}
