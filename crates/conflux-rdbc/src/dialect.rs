//! SQL dialect abstraction for conflux-rdbc
//!
//! Provides vendor-specific SQL text for PostgreSQL and MySQL. Plain SELECT
//! and INSERT statements go through sea-query; paging, counting and DDL are
//! assembled from identifiers quoted by [`SqlDialect::mark_to_object`].
//!
//! Dialects never perform I/O. Introspection methods only return query text;
//! [`crate::schema::SchemaInspector`] runs them.
//!
//! - SqlDialect: trait for database-specific SQL generation
//! - Indexer: placeholder convention (`?` or `$n`)
//! - Paging: `LIMIT/OFFSET` on MySQL, `ROW_NUMBER()` window on PostgreSQL,
//!   optionally ordered so consecutive pages neither overlap nor skip rows

use std::sync::Arc;

use crate::connection::DatabaseType;
use crate::error::Result;
use crate::schema::{sort_tables_by_foreign_keys, ForeignKey, SortedTable};
use crate::security::{
    escape_string_literal, normalize_subquery, validate_quoted_identifier, validate_sql_type_name,
};
use crate::types::{ColumnMetadata, TableMetadata};
use sea_query::{
    Alias, Asterisk, Expr, IntoIden, MysqlQueryBuilder, Order, PostgresQueryBuilder, Query,
    SelectStatement, InsertStatement, TableRef,
};

/// Column added by windowed paging queries; stripped before rows leave the connector.
pub const PAGING_ROW_NUMBER_COLUMN: &str = "conflux_row_number";

/// Alias of the single column returned by count queries.
pub const COUNT_COLUMN: &str = "count";

/// Parameter placeholder convention of a dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indexer {
    /// Anonymous `?` placeholders (MySQL)
    Positional,
    /// Numbered `$1, $2, ...` placeholders (PostgreSQL)
    Numbered,
}

impl Indexer {
    /// Placeholder for the 1-based parameter `index`
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Positional => "?".to_string(),
            Self::Numbered => format!("${}", index),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by both vendors
// ---------------------------------------------------------------------------

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

fn select_statement(
    schema: Option<&str>,
    table: &str,
    columns: &[&str],
    order_by: &[&str],
) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.from(sea_table_ref(schema, table));
    if columns.is_empty() {
        stmt.column(Asterisk);
    } else {
        for col in columns {
            stmt.column(Alias::new(*col));
        }
    }
    for col in order_by {
        stmt.order_by(Alias::new(*col), Order::Asc);
    }
    stmt
}

fn count_statement(schema: Option<&str>, table: &str) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.from(sea_table_ref(schema, table))
        .expr_as(Expr::cust("COUNT(*)"), Alias::new(COUNT_COLUMN));
    stmt
}

fn insert_statement(
    schema: Option<&str>,
    table: &str,
    columns: &[&str],
    indexer: Indexer,
) -> InsertStatement {
    let col_idens: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();
    let values: Vec<_> = (1..=columns.len())
        .map(|i| Expr::cust(indexer.placeholder(i)))
        .collect();

    let mut stmt = Query::insert();
    stmt.into_table(sea_table_ref(schema, table))
        .columns(col_idens)
        .values_panic(values);
    stmt
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync + std::fmt::Debug {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Backend this dialect targets
    fn database_type(&self) -> DatabaseType;

    /// Placeholder convention
    fn indexer(&self) -> Indexer;

    /// Character used to quote identifiers
    fn quotation_mark(&self) -> char;

    /// Schema used when an identifier is unqualified
    fn default_schema(&self) -> Option<&'static str>;

    /// `SELECT COUNT(*)` over a whole table
    fn table_count_query(&self, schema: Option<&str>, table: &str) -> Result<String>;

    /// `SELECT *` over a whole table
    fn select_query(&self, schema: Option<&str>, table: &str) -> Result<String> {
        self.prepare_select_query(schema, table, &[])
    }

    /// `SELECT` of the given columns, all columns when `columns` is empty
    fn prepare_select_query(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
    ) -> Result<String> {
        self.ordered_select_query(schema, table, columns, &[])
    }

    /// [`prepare_select_query`](Self::prepare_select_query) with an ascending
    /// `ORDER BY` over `order_by`
    fn ordered_select_query(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        order_by: &[&str],
    ) -> Result<String>;

    /// Restrict `query` to rows `start < n <= end` (0-based start, exclusive).
    ///
    /// Rows are numbered in whatever order the server returns them; see
    /// [`ordered_paging_query`](Self::ordered_paging_query) for stable pages.
    fn paging_query(&self, query: &str, start: u64, end: u64) -> Result<String> {
        self.ordered_paging_query(query, &[], start, end)
    }

    /// Page of `query` with rows numbered in ascending `order_by` order.
    ///
    /// The `order_by` columns must be part of the query's output.
    fn ordered_paging_query(
        &self,
        query: &str,
        order_by: &[&str],
        start: u64,
        end: u64,
    ) -> Result<String>;

    /// Single-row parameterised INSERT
    fn insert_query(&self, schema: Option<&str>, table: &str, columns: &[&str])
        -> Result<String>;

    /// Native column type for DDL
    fn native_type(&self, column: &ColumnMetadata) -> String;

    /// Escape `value` for use inside a single-quoted string literal
    fn escape_string(&self, value: &str) -> String {
        escape_string_literal(value)
    }

    /// Lists user schemas, one `schema_name` column
    fn schemas_query(&self) -> String;

    /// Lists base tables of `schema`, one `table_name` column
    fn tables_query(&self, schema: &str) -> String;

    /// Lists views of `schema`, one `table_name` column
    fn views_query(&self, schema: &str) -> String;

    /// Columns of a table:
    /// `column_name, data_type, nullable, ordinal, max_length, precision, scale, pk_ordinal`
    fn columns_query(&self, schema: &str, table: &str) -> String;

    /// Foreign keys declared in `schema`:
    /// `constraint_name, table_name, referenced_schema, referenced_table`
    fn foreign_keys_query(&self, schema: &str) -> String;

    // -----------------------------------------------------------------------
    // Provided
    // -----------------------------------------------------------------------

    /// Placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String {
        self.indexer().placeholder(index)
    }

    /// Quote an identifier, rejecting names that contain the quote character
    fn mark_to_object(&self, name: &str) -> Result<String> {
        let quote = self.quotation_mark();
        validate_quoted_identifier(name, quote)?;
        Ok(format!("{quote}{name}{quote}"))
    }

    /// `schema.table` with both parts quoted
    fn qualified_table(&self, schema: Option<&str>, table: &str) -> Result<String> {
        let table = self.mark_to_object(table)?;
        match schema {
            Some(s) => Ok(format!("{}.{}", self.mark_to_object(s)?, table)),
            None => Ok(table),
        }
    }

    /// Quoted, comma separated `ORDER BY` list; empty when `columns` is empty
    fn order_by_clause(&self, columns: &[&str]) -> Result<String> {
        if columns.is_empty() {
            return Ok(String::new());
        }
        let cols = columns
            .iter()
            .map(|c| self.mark_to_object(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("ORDER BY {}", cols.join(", ")))
    }

    /// Validate every identifier that goes through sea-query
    fn check_identifiers(&self, schema: Option<&str>, table: &str, columns: &[&str]) -> Result<()> {
        let quote = self.quotation_mark();
        if let Some(s) = schema {
            validate_quoted_identifier(s, quote)?;
        }
        validate_quoted_identifier(table, quote)?;
        for col in columns {
            validate_quoted_identifier(col, quote)?;
        }
        Ok(())
    }

    /// Wrap an arbitrary query in `SELECT COUNT(*)`
    fn count_query(&self, query: &str) -> Result<String> {
        let inner = normalize_subquery(query)?;
        Ok(format!(
            "SELECT COUNT(*) AS {} FROM ({}) AS count_subquery",
            self.mark_to_object(COUNT_COLUMN)?,
            inner
        ))
    }

    /// Statement head up to and including `VALUES `
    fn insert_head(&self, schema: Option<&str>, table: &str, columns: &[&str]) -> Result<String> {
        let cols = columns
            .iter()
            .map(|c| self.mark_to_object(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ",
            self.qualified_table(schema, table)?,
            cols.join(", ")
        ))
    }

    /// Value tuple for row `row_offset` of a multi-row INSERT
    fn insert_values_query(&self, column_count: usize, row_offset: usize) -> String {
        let first = row_offset * column_count + 1;
        let placeholders: Vec<_> = (first..first + column_count)
            .map(|i| self.placeholder(i))
            .collect();
        format!("({})", placeholders.join(", "))
    }

    /// `CREATE TABLE` from metadata
    fn create_table_query(&self, table: &TableMetadata) -> Result<String> {
        if table.columns.is_empty() {
            return Err(crate::Error::schema(format!(
                "table '{}' has no columns",
                table.name
            )));
        }

        let mut defs = Vec::with_capacity(table.columns.len() + 1);
        for col in &table.columns {
            let native = self.native_type(col);
            validate_sql_type_name(&native)?;
            let null = if col.nullable { "" } else { " NOT NULL" };
            defs.push(format!("{} {}{}", self.mark_to_object(&col.name)?, native, null));
        }

        let pk = table.primary_key_columns();
        if !pk.is_empty() {
            let cols = pk
                .iter()
                .map(|c| self.mark_to_object(&c.name))
                .collect::<Result<Vec<_>>>()?;
            defs.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        Ok(format!(
            "CREATE TABLE {} ({})",
            self.qualified_table(table.schema.as_deref(), &table.name)?,
            defs.join(", ")
        ))
    }

    /// `DROP TABLE IF EXISTS`
    fn drop_table_query(&self, schema: Option<&str>, table: &str) -> Result<String> {
        Ok(format!(
            "DROP TABLE IF EXISTS {}",
            self.qualified_table(schema, table)?
        ))
    }

    /// `TRUNCATE TABLE`
    fn truncate_table_query(&self, schema: Option<&str>, table: &str) -> Result<String> {
        Ok(format!("TRUNCATE TABLE {}", self.qualified_table(schema, table)?))
    }

    /// Order tables so each one follows every table it references
    fn sorted_table_and_foreign_key_names(
        &self,
        tables: &[String],
        foreign_keys: &[ForeignKey],
    ) -> Result<Vec<SortedTable>> {
        sort_tables_by_foreign_keys(tables, foreign_keys)
    }
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn indexer(&self) -> Indexer {
        Indexer::Numbered
    }

    fn quotation_mark(&self) -> char {
        '"'
    }

    fn default_schema(&self) -> Option<&'static str> {
        Some("public")
    }

    fn table_count_query(&self, schema: Option<&str>, table: &str) -> Result<String> {
        self.check_identifiers(schema, table, &[])?;
        Ok(count_statement(schema, table).to_string(PostgresQueryBuilder))
    }

    fn ordered_select_query(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        order_by: &[&str],
    ) -> Result<String> {
        self.check_identifiers(schema, table, columns)?;
        self.check_identifiers(None, table, order_by)?;
        Ok(select_statement(schema, table, columns, order_by).to_string(PostgresQueryBuilder))
    }

    fn ordered_paging_query(
        &self,
        query: &str,
        order_by: &[&str],
        start: u64,
        end: u64,
    ) -> Result<String> {
        let inner = normalize_subquery(query)?;
        let rn = self.mark_to_object(PAGING_ROW_NUMBER_COLUMN)?;
        let window = self.order_by_clause(order_by)?;
        Ok(format!(
            "SELECT * FROM (SELECT ordered_query.*, ROW_NUMBER() OVER ({window}) AS {rn} \
             FROM ({inner}) AS ordered_query) AS paged_query \
             WHERE {rn} > {start} AND {rn} <= {end} ORDER BY {rn}"
        ))
    }

    fn insert_query(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
    ) -> Result<String> {
        self.check_identifiers(schema, table, columns)?;
        Ok(insert_statement(schema, table, columns, self.indexer()).to_string(PostgresQueryBuilder))
    }

    fn native_type(&self, column: &ColumnMetadata) -> String {
        match column.type_name.to_uppercase().as_str() {
            "BOOLEAN" | "BOOL" | "TINYINT(1)" => "BOOLEAN".to_string(),
            "TINYINT" | "SMALLINT" => "SMALLINT".to_string(),
            "INTEGER" | "INT" | "MEDIUMINT" => "INTEGER".to_string(),
            "BIGINT" => "BIGINT".to_string(),
            "REAL" | "FLOAT" => "REAL".to_string(),
            "DOUBLE PRECISION" | "DOUBLE" => "DOUBLE PRECISION".to_string(),
            "DECIMAL" | "NUMERIC" => match (column.precision, column.scale) {
                (Some(p), Some(s)) => format!("NUMERIC({},{})", p, s),
                (Some(p), None) => format!("NUMERIC({})", p),
                _ => "NUMERIC".to_string(),
            },
            "VARCHAR" | "CHARACTER VARYING" => match column.max_length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            "TEXT" | "LONGTEXT" | "MEDIUMTEXT" => "TEXT".to_string(),
            "BYTEA" | "BLOB" | "LONGBLOB" | "VARBINARY" => "BYTEA".to_string(),
            "DATE" => "DATE".to_string(),
            "TIME" => "TIME".to_string(),
            "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP".to_string(),
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => "TIMESTAMPTZ".to_string(),
            "UUID" => "UUID".to_string(),
            "JSON" => "JSON".to_string(),
            "JSONB" => "JSONB".to_string(),
            other => other.to_string(),
        }
    }

    fn schemas_query(&self) -> String {
        "SELECT schema_name::text AS schema_name FROM information_schema.schemata \
         WHERE schema_name NOT IN ('pg_catalog', 'information_schema') \
         AND schema_name NOT LIKE 'pg_toast%' AND schema_name NOT LIKE 'pg_temp%' \
         ORDER BY schema_name"
            .to_string()
    }

    fn tables_query(&self, schema: &str) -> String {
        format!(
            "SELECT table_name::text AS table_name FROM information_schema.tables \
             WHERE table_schema = '{}' AND table_type = 'BASE TABLE' ORDER BY table_name",
            self.escape_string(schema)
        )
    }

    fn views_query(&self, schema: &str) -> String {
        format!(
            "SELECT table_name::text AS table_name FROM information_schema.views \
             WHERE table_schema = '{}' ORDER BY table_name",
            self.escape_string(schema)
        )
    }

    fn columns_query(&self, schema: &str, table: &str) -> String {
        let schema = self.escape_string(schema);
        let table = self.escape_string(table);
        format!(
            r#"SELECT
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                c.is_nullable = 'YES' AS nullable,
                c.ordinal_position::int AS ordinal,
                c.character_maximum_length::int AS max_length,
                c.numeric_precision::int AS precision,
                c.numeric_scale::int AS scale,
                pk.ordinal_position::int AS pk_ordinal
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT ku.column_name, ku.ordinal_position
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage ku
                    ON tc.constraint_name = ku.constraint_name
                    AND tc.table_schema = ku.table_schema
                    AND tc.table_name = ku.table_name
                WHERE tc.constraint_type = 'PRIMARY KEY'
                    AND tc.table_schema = '{schema}'
                    AND tc.table_name = '{table}'
            ) pk ON c.column_name = pk.column_name
            WHERE c.table_schema = '{schema}' AND c.table_name = '{table}'
            ORDER BY c.ordinal_position"#
        )
    }

    fn foreign_keys_query(&self, schema: &str) -> String {
        format!(
            r#"SELECT DISTINCT
                tc.constraint_name::text AS constraint_name,
                tc.table_name::text AS table_name,
                ccu.table_schema::text AS referenced_schema,
                ccu.table_name::text AS referenced_table
            FROM information_schema.table_constraints tc
            JOIN information_schema.constraint_column_usage ccu
                ON tc.constraint_name = ccu.constraint_name
                AND tc.constraint_schema = ccu.constraint_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
                AND tc.table_schema = '{}'
            ORDER BY 2, 1"#,
            self.escape_string(schema)
        )
    }
}

// ===========================================================================
// MySQL
// ===========================================================================

/// MySQL dialect
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn indexer(&self) -> Indexer {
        Indexer::Positional
    }

    fn quotation_mark(&self) -> char {
        '`'
    }

    fn default_schema(&self) -> Option<&'static str> {
        None
    }

    fn table_count_query(&self, schema: Option<&str>, table: &str) -> Result<String> {
        self.check_identifiers(schema, table, &[])?;
        Ok(count_statement(schema, table).to_string(MysqlQueryBuilder))
    }

    fn ordered_select_query(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        order_by: &[&str],
    ) -> Result<String> {
        self.check_identifiers(schema, table, columns)?;
        self.check_identifiers(None, table, order_by)?;
        Ok(select_statement(schema, table, columns, order_by).to_string(MysqlQueryBuilder))
    }

    fn ordered_paging_query(
        &self,
        query: &str,
        order_by: &[&str],
        start: u64,
        end: u64,
    ) -> Result<String> {
        let inner = normalize_subquery(query)?;
        let limit = end.saturating_sub(start);
        let order = match self.order_by_clause(order_by)? {
            clause if clause.is_empty() => String::new(),
            clause => format!(" {clause}"),
        };
        Ok(format!(
            "SELECT * FROM ({inner}) AS paged_query{order} LIMIT {limit} OFFSET {start}"
        ))
    }

    fn insert_query(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
    ) -> Result<String> {
        self.check_identifiers(schema, table, columns)?;
        Ok(insert_statement(schema, table, columns, self.indexer()).to_string(MysqlQueryBuilder))
    }

    fn native_type(&self, column: &ColumnMetadata) -> String {
        match column.type_name.to_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => "TINYINT(1)".to_string(),
            "SMALLINT" => "SMALLINT".to_string(),
            "INTEGER" | "INT" => "INT".to_string(),
            "BIGINT" => "BIGINT".to_string(),
            "REAL" | "FLOAT" => "FLOAT".to_string(),
            "DOUBLE PRECISION" | "DOUBLE" => "DOUBLE".to_string(),
            "DECIMAL" | "NUMERIC" => match (column.precision, column.scale) {
                (Some(p), Some(s)) => format!("DECIMAL({},{})", p, s),
                (Some(p), None) => format!("DECIMAL({})", p),
                _ => "DECIMAL(38,10)".to_string(),
            },
            "VARCHAR" | "CHARACTER VARYING" => match column.max_length {
                Some(len) if len <= 16383 => format!("VARCHAR({})", len),
                _ => "LONGTEXT".to_string(),
            },
            "TEXT" => "LONGTEXT".to_string(),
            "BYTEA" | "BLOB" => "LONGBLOB".to_string(),
            "DATE" => "DATE".to_string(),
            "TIME" => "TIME(6)".to_string(),
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => "DATETIME(6)".to_string(),
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => "TIMESTAMP(6)".to_string(),
            "UUID" => "CHAR(36)".to_string(),
            "JSON" | "JSONB" => "JSON".to_string(),
            other => other.to_string(),
        }
    }

    // Backslash is an escape character under the default sql_mode
    fn escape_string(&self, value: &str) -> String {
        escape_string_literal(&value.replace('\\', "\\\\"))
    }

    fn schemas_query(&self) -> String {
        "SELECT SCHEMA_NAME AS schema_name FROM information_schema.SCHEMATA \
         WHERE SCHEMA_NAME NOT IN ('mysql', 'information_schema', 'performance_schema', 'sys') \
         ORDER BY SCHEMA_NAME"
            .to_string()
    }

    fn tables_query(&self, schema: &str) -> String {
        format!(
            "SELECT TABLE_NAME AS table_name FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
            self.escape_string(schema)
        )
    }

    fn views_query(&self, schema: &str) -> String {
        format!(
            "SELECT TABLE_NAME AS table_name FROM information_schema.VIEWS \
             WHERE TABLE_SCHEMA = '{}' ORDER BY TABLE_NAME",
            self.escape_string(schema)
        )
    }

    fn columns_query(&self, schema: &str, table: &str) -> String {
        let schema = self.escape_string(schema);
        let table = self.escape_string(table);
        format!(
            r#"SELECT
                c.COLUMN_NAME AS column_name,
                c.DATA_TYPE AS data_type,
                c.IS_NULLABLE = 'YES' AS nullable,
                c.ORDINAL_POSITION AS ordinal,
                c.CHARACTER_MAXIMUM_LENGTH AS max_length,
                c.NUMERIC_PRECISION AS `precision`,
                c.NUMERIC_SCALE AS scale,
                k.ORDINAL_POSITION AS pk_ordinal
            FROM information_schema.COLUMNS c
            LEFT JOIN information_schema.KEY_COLUMN_USAGE k
                ON k.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND k.TABLE_NAME = c.TABLE_NAME
                AND k.COLUMN_NAME = c.COLUMN_NAME
                AND k.CONSTRAINT_NAME = 'PRIMARY'
            WHERE c.TABLE_SCHEMA = '{schema}' AND c.TABLE_NAME = '{table}'
            ORDER BY c.ORDINAL_POSITION"#
        )
    }

    fn foreign_keys_query(&self, schema: &str) -> String {
        format!(
            r#"SELECT DISTINCT
                CONSTRAINT_NAME AS constraint_name,
                TABLE_NAME AS table_name,
                REFERENCED_TABLE_SCHEMA AS referenced_schema,
                REFERENCED_TABLE_NAME AS referenced_table
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = '{}'
                AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY 2, 1"#,
            self.escape_string(schema)
        )
    }
}

/// Get the dialect for a database type
pub fn dialect_for_type(db_type: DatabaseType) -> Arc<dyn SqlDialect> {
    match db_type {
        DatabaseType::PostgreSQL => Arc::new(PostgresDialect),
        DatabaseType::MySQL => Arc::new(MySqlDialect),
    }
}

/// Get a dialect by vendor name (`postgres`, `postgresql`, `mysql`, `mariadb`)
pub fn dialect_for(name: &str) -> Option<Arc<dyn SqlDialect>> {
    match name.to_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Some(Arc::new(PostgresDialect)),
        "mysql" | "mariadb" => Some(Arc::new(MySqlDialect)),
        _ => None,
    }
}
