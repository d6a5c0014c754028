//! Catalog lookup
//!
//! Existing constraints, indexes and columns of the tables an operation
//! touches. The planner uses it to resolve objects to drop, to find
//! supporting indexes, and to skip objects a previous run already built.

use crate::error::{precondition_error, AppError};
use crate::naming::{quote_ident, NOT_NULL_SUFFIX};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio_postgres::Client;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Check,
    Unique,
    PrimaryKey,
    ForeignKey,
    Exclusion,
}

impl ConstraintKind {
    /// Map `pg_constraint.contype`
    pub fn from_contype(contype: &str) -> Option<Self> {
        match contype {
            "c" => Some(ConstraintKind::Check),
            "u" => Some(ConstraintKind::Unique),
            "p" => Some(ConstraintKind::PrimaryKey),
            "f" => Some(ConstraintKind::ForeignKey),
            "x" => Some(ConstraintKind::Exclusion),
            _ => None,
        }
    }

    pub fn is_index_backed(&self) -> bool {
        matches!(self, ConstraintKind::Unique | ConstraintKind::PrimaryKey)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintInfo {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    /// False while the constraint is NOT VALID
    #[serde(default = "default_true")]
    pub validated: bool,
    /// Backing index for unique / primary key / exclusion constraints
    #[serde(default)]
    pub index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub opclasses: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
    /// False for a CONCURRENTLY build that failed half-way
    #[serde(default = "default_true")]
    pub valid: bool,
    /// Index on a partitioned table, which cannot be dropped concurrently
    #[serde(default)]
    pub partitioned: bool,
    /// Constraint that owns this index
    #[serde(default)]
    pub constraint: Option<String>,
}

impl IndexInfo {
    pub fn is_pattern_ops(&self) -> bool {
        self.opclasses.iter().any(|o| o.ends_with("_pattern_ops"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
}

fn default_true() -> bool {
    true
}

/// Everything known about one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCatalog {
    #[serde(default)]
    pub constraints: Vec<ConstraintInfo>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

impl TableCatalog {
    pub fn with_constraint(mut self, constraint: ConstraintInfo) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_index(mut self, index: IndexInfo) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }
}

/// Lookup the caller supplies to the planner
pub trait Catalog {
    /// Introspected metadata for `table`, `None` if the table was not looked up
    fn table(&self, table: &str) -> Option<&TableCatalog>;

    fn constraint(&self, table: &str, name: &str) -> Option<&ConstraintInfo> {
        self.table(table)?.constraints.iter().find(|c| c.name == name)
    }

    fn index(&self, table: &str, name: &str) -> Option<&IndexInfo> {
        self.table(table)?.indexes.iter().find(|i| i.name == name)
    }

    fn column(&self, table: &str, column: &str) -> Option<&ColumnInfo> {
        self.table(table)?.columns.iter().find(|c| c.name == column)
    }

    /// The single constraint on exactly `columns` (optionally of `kind`)
    fn resolve_constraint(
        &self,
        table: &str,
        columns: &[String],
        kind: Option<ConstraintKind>,
    ) -> Result<&ConstraintInfo, AppError> {
        let entry = self
            .table(table)
            .ok_or_else(|| precondition_error(format!("no catalog metadata for table {}", table)))?;
        let matches: Vec<&ConstraintInfo> = entry
            .constraints
            .iter()
            .filter(|c| c.columns == columns && kind.map_or(true, |k| c.kind == k))
            .collect();

        match matches.as_slice() {
            [only] => Ok(*only),
            [] => Err(precondition_error(format!(
                "no constraint on {}({}) to drop",
                table,
                columns.join(", ")
            ))),
            many => Err(precondition_error(format!(
                "found {} constraints on {}({}): {}",
                many.len(),
                table,
                columns.join(", "),
                many.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// The single standalone index on exactly `columns`
    fn resolve_index(&self, table: &str, columns: &[String]) -> Result<&IndexInfo, AppError> {
        let entry = self
            .table(table)
            .ok_or_else(|| precondition_error(format!("no catalog metadata for table {}", table)))?;
        let matches: Vec<&IndexInfo> = entry
            .indexes
            .iter()
            .filter(|i| i.columns == columns && i.constraint.is_none() && !i.is_pattern_ops())
            .collect();

        match matches.as_slice() {
            [only] => Ok(*only),
            [] => Err(precondition_error(format!(
                "no index on {}({}) to drop",
                table,
                columns.join(", ")
            ))),
            many => Err(precondition_error(format!(
                "found {} indexes on {}({}): {}",
                many.len(),
                table,
                columns.join(", "),
                many.iter().map(|i| i.name.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// A valid index whose leading columns are `columns`
    fn supporting_index(&self, table: &str, columns: &[String]) -> Option<&IndexInfo> {
        self.table(table)?
            .indexes
            .iter()
            .find(|i| i.valid && i.columns.len() >= columns.len() && i.columns[..columns.len()] == *columns)
    }

    /// LIKE-prefix helper index on a single column
    fn pattern_ops_index(&self, table: &str, column: &str) -> Option<&IndexInfo> {
        self.table(table)?
            .indexes
            .iter()
            .find(|i| i.is_pattern_ops() && i.columns.len() == 1 && i.columns[0] == column)
    }

    /// Helper CHECK (col IS NOT NULL) left in place of a NOT NULL flag
    fn not_null_check(&self, table: &str, column: &str) -> Result<Option<&ConstraintInfo>, AppError> {
        let Some(entry) = self.table(table) else {
            return Ok(None);
        };
        let matches: Vec<&ConstraintInfo> = entry
            .constraints
            .iter()
            .filter(|c| {
                c.kind == ConstraintKind::Check
                    && c.name.ends_with(NOT_NULL_SUFFIX)
                    && c.columns.len() == 1
                    && c.columns[0] == column
            })
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            many => Err(precondition_error(format!(
                "found {} NOT NULL check constraints on {}({})",
                many.len(),
                table,
                column
            ))),
        }
    }
}

/// Where fresh snapshots come from, read right before an operation is planned
pub trait CatalogSource {
    fn load_catalog(&self, tables: &[String]) -> impl Future<Output = Result<CatalogSnapshot, AppError>> + Send;
}

impl CatalogSource for Client {
    async fn load_catalog(&self, tables: &[String]) -> Result<CatalogSnapshot, AppError> {
        CatalogSnapshot::load(self, tables).await
    }
}

/// In-memory catalog, keyed by table name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogSnapshot {
    tables: HashMap<String, TableCatalog>,
}

impl Catalog for CatalogSnapshot {
    fn table(&self, table: &str) -> Option<&TableCatalog> {
        self.tables.get(table)
    }
}

impl CatalogSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>, entry: TableCatalog) -> Self {
        self.tables.insert(table.into(), entry);
        self
    }

    pub fn insert(&mut self, table: impl Into<String>, entry: TableCatalog) {
        self.tables.insert(table.into(), entry);
    }

    /// Introspect constraints, indexes and columns of `tables`
    pub async fn load(client: &Client, tables: &[String]) -> Result<Self, AppError> {
        let mut snapshot = Self::new();
        for table in tables {
            if snapshot.tables.contains_key(table) {
                continue;
            }
            let regclass = quote_ident(table);
            let entry = TableCatalog {
                constraints: Self::get_constraints(client, &regclass).await?,
                indexes: Self::get_indexes(client, &regclass).await?,
                columns: Self::get_columns(client, &regclass).await?,
            };
            debug!(
                "Introspected {}: {} constraints, {} indexes, {} columns",
                table,
                entry.constraints.len(),
                entry.indexes.len(),
                entry.columns.len()
            );
            snapshot.insert(table.clone(), entry);
        }
        Ok(snapshot)
    }

    async fn get_constraints(client: &Client, regclass: &str) -> Result<Vec<ConstraintInfo>, AppError> {
        let query = r#"
            SELECT
                c.conname::text AS name,
                c.contype::text AS kind,
                c.convalidated AS validated,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS columns,
                i.relname::text AS index_name
            FROM pg_constraint c
            LEFT JOIN pg_class i ON i.oid = c.conindid
            WHERE c.conrelid = to_regclass($1)
            ORDER BY c.conname
        "#;

        let rows = client.query(query, &[&regclass]).await?;

        let mut constraints = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.try_get("kind")?;
            let Some(kind) = ConstraintKind::from_contype(&kind) else {
                continue;
            };
            constraints.push(ConstraintInfo {
                name: row.try_get("name")?,
                kind,
                columns: row.try_get("columns")?,
                validated: row.try_get("validated")?,
                index: row.try_get("index_name")?,
            });
        }

        Ok(constraints)
    }

    async fn get_indexes(client: &Client, regclass: &str) -> Result<Vec<IndexInfo>, AppError> {
        let query = r#"
            SELECT
                i.relname::text AS name,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS columns,
                ARRAY(
                    SELECT o.opcname::text
                    FROM unnest(ix.indclass::oid[]) WITH ORDINALITY AS k(opclass, ord)
                    JOIN pg_opclass o ON o.oid = k.opclass
                    ORDER BY k.ord
                ) AS opclasses,
                ix.indisunique AS is_unique,
                ix.indisprimary AS is_primary,
                ix.indisvalid AS is_valid,
                t.relkind = 'p' AS partitioned,
                con.conname::text AS constraint_name
            FROM pg_index ix
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            LEFT JOIN pg_constraint con ON con.conindid = ix.indexrelid AND con.conrelid = ix.indrelid
            WHERE ix.indrelid = to_regclass($1)
            ORDER BY i.relname
        "#;

        let rows = client.query(query, &[&regclass]).await?;

        let indexes = rows
            .iter()
            .map(|row| {
                Ok(IndexInfo {
                    name: row.try_get("name")?,
                    columns: row.try_get("columns")?,
                    opclasses: row.try_get("opclasses")?,
                    unique: row.try_get("is_unique")?,
                    primary: row.try_get("is_primary")?,
                    valid: row.try_get("is_valid")?,
                    partitioned: row.try_get("partitioned")?,
                    constraint: row.try_get("constraint_name")?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;

        Ok(indexes)
    }

    async fn get_columns(client: &Client, regclass: &str) -> Result<Vec<ColumnInfo>, AppError> {
        let query = r#"
            SELECT
                a.attname::text AS name,
                format_type(a.atttypid, a.atttypmod) AS data_type,
                a.attnotnull AS not_null
            FROM pg_attribute a
            WHERE a.attrelid = to_regclass($1)
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
        "#;

        let rows = client.query(query, &[&regclass]).await?;

        let columns = rows
            .iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    data_type: row.try_get("data_type")?,
                    not_null: row.try_get("not_null")?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;

        Ok(columns)
    }
}
