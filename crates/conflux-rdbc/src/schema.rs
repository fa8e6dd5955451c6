//! Schema discovery for conflux-rdbc
//!
//! Provides:
//! - ForeignKey / SortedTable: foreign-key graph model
//! - sort_tables_by_foreign_keys: deterministic dependency ordering
//! - SchemaInspector: runs a dialect's introspection queries over a connection

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::types::{ColumnMetadata, Row, TableKind, TableMetadata};

/// A foreign key constraint between two tables
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Constraint name
    pub name: String,
    /// Table declaring the constraint
    pub table: String,
    /// Schema of the referenced table, when reported by the server
    pub referenced_schema: Option<String>,
    /// Referenced table
    pub referenced_table: String,
}

impl ForeignKey {
    /// Create a foreign key from `table` to `referenced_table`
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        referenced_table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            referenced_schema: None,
            referenced_table: referenced_table.into(),
        }
    }

    /// Whether the constraint points back at its own table
    pub fn is_self_reference(&self) -> bool {
        self.table == self.referenced_table
    }
}

/// A table in dependency order, with the constraints it declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedTable {
    /// Table name
    pub name: String,
    /// Foreign keys declared by this table
    pub foreign_keys: Vec<ForeignKey>,
}

/// Order `tables` so that every table comes after all tables it references.
///
/// Kahn's algorithm with ties broken by ascending name, so the same graph
/// always yields the same order. Self-references and references to tables
/// outside `tables` do not constrain the order. A cycle is reported as
/// [`Error::CyclicDependency`] naming every table that could not be placed.
pub fn sort_tables_by_foreign_keys(
    tables: &[String],
    foreign_keys: &[ForeignKey],
) -> Result<Vec<SortedTable>> {
    let names: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

    // referenced -> tables that depend on it
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut depends_on: BTreeMap<&str, BTreeSet<&str>> =
        names.iter().map(|n| (*n, BTreeSet::new())).collect();
    let mut declared: BTreeMap<&str, Vec<ForeignKey>> = BTreeMap::new();

    for fk in foreign_keys {
        if !names.contains(fk.table.as_str()) {
            continue;
        }
        declared.entry(fk.table.as_str()).or_default().push(fk.clone());

        if fk.is_self_reference() || !names.contains(fk.referenced_table.as_str()) {
            continue;
        }
        if let Some(deps) = depends_on.get_mut(fk.table.as_str()) {
            deps.insert(fk.referenced_table.as_str());
        }
        dependents
            .entry(fk.referenced_table.as_str())
            .or_default()
            .insert(fk.table.as_str());
    }

    let mut in_degree: BTreeMap<&str, usize> =
        depends_on.iter().map(|(n, deps)| (*n, deps.len())).collect();
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();

    let mut ordered = Vec::with_capacity(names.len());
    while let Some(next) = ready.pop_first() {
        ordered.push(SortedTable {
            name: next.to_string(),
            foreign_keys: declared.remove(next).unwrap_or_default(),
        });

        if let Some(children) = dependents.get(next) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    if ordered.len() < names.len() {
        let placed: BTreeSet<&str> = ordered.iter().map(|t| t.name.as_str()).collect();
        let tables = names
            .iter()
            .filter(|n| !placed.contains(*n))
            .map(|n| n.to_string())
            .collect();
        return Err(Error::CyclicDependency { tables });
    }

    Ok(ordered)
}

/// Runs a dialect's introspection queries over a live connection
pub struct SchemaInspector<'a> {
    conn: &'a dyn Connection,
    dialect: Arc<dyn SqlDialect>,
}

impl<'a> SchemaInspector<'a> {
    /// Create an inspector over `conn`
    pub fn new(conn: &'a dyn Connection, dialect: Arc<dyn SqlDialect>) -> Self {
        Self { conn, dialect }
    }

    /// List user schemas (databases on MySQL)
    pub async fn schemas(&self) -> Result<Vec<String>> {
        let rows = self.conn.query(&self.dialect.schemas_query(), &[]).await?;
        rows.iter().map(|r| text_column(r, "schema_name")).collect()
    }

    /// List base tables in `schema`
    pub async fn tables(&self, schema: &str) -> Result<Vec<String>> {
        self.relations(schema, TableKind::Table).await
    }

    /// List views in `schema`
    pub async fn views(&self, schema: &str) -> Result<Vec<String>> {
        self.relations(schema, TableKind::View).await
    }

    async fn relations(&self, schema: &str, kind: TableKind) -> Result<Vec<String>> {
        let sql = match kind {
            TableKind::Table => self.dialect.tables_query(schema),
            TableKind::View => self.dialect.views_query(schema),
        };
        let rows = self.conn.query(&sql, &[]).await?;
        rows.iter().map(|r| text_column(r, "table_name")).collect()
    }

    /// Column metadata of one table, `None` if the table does not exist
    pub async fn table(&self, schema: &str, table: &str) -> Result<Option<TableMetadata>> {
        let rows = self
            .conn
            .query(&self.dialect.columns_query(schema, table), &[])
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut meta = TableMetadata::new(table).with_schema(schema);
        for row in &rows {
            let mut col = ColumnMetadata::new(
                text_column(row, "column_name")?,
                text_column(row, "data_type")?,
            );
            col.nullable = row
                .get_by_name("nullable")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            col.ordinal = int_column(row, "ordinal").unwrap_or(0);
            col.max_length = int_column(row, "max_length");
            col.precision = int_column(row, "precision");
            col.scale = int_column(row, "scale");
            col.primary_key_ordinal = int_column(row, "pk_ordinal");
            meta.columns.push(col);
        }
        Ok(Some(meta))
    }

    /// Foreign keys declared in `schema`
    pub async fn foreign_keys(&self, schema: &str) -> Result<Vec<ForeignKey>> {
        let rows = self
            .conn
            .query(&self.dialect.foreign_keys_query(schema), &[])
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ForeignKey {
                    name: text_column(row, "constraint_name")?,
                    table: text_column(row, "table_name")?,
                    referenced_schema: row
                        .get_by_name("referenced_schema")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    referenced_table: text_column(row, "referenced_table")?,
                })
            })
            .collect()
    }

    /// Tables of `schema` in foreign-key dependency order
    pub async fn sorted_table_and_foreign_key_names(
        &self,
        schema: &str,
    ) -> Result<Vec<SortedTable>> {
        let tables = self.tables(schema).await?;
        let foreign_keys = self.foreign_keys(schema).await?;
        debug!(
            "Sorting {} tables with {} foreign keys in schema '{}'",
            tables.len(),
            foreign_keys.len(),
            schema
        );
        self.dialect
            .sorted_table_and_foreign_key_names(&tables, &foreign_keys)
    }
}

fn text_column(row: &Row, name: &str) -> Result<String> {
    row.get_by_name(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::schema(format!("introspection row is missing column '{}'", name)))
}

fn int_column(row: &Row, name: &str) -> Option<u32> {
    row.get_by_name(name)
        .and_then(|v| v.as_i64())
        .and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(sorted: &[SortedTable]) -> Vec<&str> {
        sorted.iter().map(|t| t.name.as_str()).collect()
    }

    fn owned(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_sort_places_parents_first() {
        let tables = owned(&["order_items", "orders", "customers", "products"]);
        let fks = vec![
            ForeignKey::new("fk_items_order", "order_items", "orders"),
            ForeignKey::new("fk_items_product", "order_items", "products"),
            ForeignKey::new("fk_orders_customer", "orders", "customers"),
        ];

        let sorted = sort_tables_by_foreign_keys(&tables, &fks).unwrap();
        assert_eq!(
            names(&sorted),
            vec!["customers", "orders", "products", "order_items"]
        );
        assert_eq!(sorted[3].foreign_keys.len(), 2);
    }

    #[test]
    fn test_sort_ties_break_by_name() {
        let tables = owned(&["zeta", "alpha", "mid"]);
        let sorted = sort_tables_by_foreign_keys(&tables, &[]).unwrap();
        assert_eq!(names(&sorted), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_sort_ignores_self_and_external_references() {
        let tables = owned(&["employees", "departments"]);
        let fks = vec![
            ForeignKey::new("fk_manager", "employees", "employees"),
            ForeignKey::new("fk_dept", "employees", "departments"),
            ForeignKey::new("fk_region", "departments", "regions"),
        ];
        let sorted = sort_tables_by_foreign_keys(&tables, &fks).unwrap();
        assert_eq!(names(&sorted), vec!["departments", "employees"]);
    }

    #[test]
    fn test_sort_rejects_cycles() {
        let tables = owned(&["a", "b", "c", "standalone"]);
        let fks = vec![
            ForeignKey::new("fk_ab", "a", "b"),
            ForeignKey::new("fk_bc", "b", "c"),
            ForeignKey::new("fk_ca", "c", "a"),
        ];
        match sort_tables_by_foreign_keys(&tables, &fks) {
            Err(Error::CyclicDependency { tables }) => {
                assert_eq!(tables, vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_duplicate_constraints_counted_once() {
        let tables = owned(&["child", "parent"]);
        let fks = vec![
            ForeignKey::new("fk_1", "child", "parent"),
            ForeignKey::new("fk_2", "child", "parent"),
        ];
        let sorted = sort_tables_by_foreign_keys(&tables, &fks).unwrap();
        assert_eq!(names(&sorted), vec!["parent", "child"]);
    }
}
