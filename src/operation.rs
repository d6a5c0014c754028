//! Schema change operations
//!
//! One abstract operation per migration step, as produced by the upstream
//! migration framework. Operations are never diffed here, only compiled.

use crate::catalog::ConstraintKind;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Types of schema changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Operation {
    /// Create a new table
    CreateTable(CreateTableOp),
    /// Drop an existing table
    DropTable(DropTableOp),
    /// Rename a table
    RenameTable(RenameTableOp),
    /// Move a table to another tablespace
    SetTablespace(SetTablespaceOp),
    /// Add a column to a table
    AddColumn(AddColumnOp),
    /// Drop a column
    DropColumn(DropColumnOp),
    /// Rename a column
    RenameColumn(RenameColumnOp),
    /// Change the type of a column
    AlterColumnType(AlterColumnTypeOp),
    /// Make a column NOT NULL
    SetNotNull(ColumnRef),
    /// Make a column nullable
    DropNotNull(ColumnRef),
    /// Add a table constraint
    AddConstraint(AddConstraintOp),
    /// Drop a table constraint
    DropConstraint(DropConstraintOp),
    /// Add an index
    AddIndex(AddIndexOp),
    /// Drop an index
    DropIndex(DropIndexOp),
    /// Add or remove composite unique constraints / indexes
    AlterColumnsTogether(AlterColumnsTogetherOp),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableOp {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropTableOp {
    pub table: String,
    #[serde(default = "default_true")]
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameTableOp {
    pub table: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTablespaceOp {
    pub table: String,
    pub tablespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddColumnOp {
    pub table: String,
    pub column: ColumnDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropColumnOp {
    pub table: String,
    pub column: String,
    #[serde(default = "default_true")]
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameColumnOp {
    pub table: String,
    pub column: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterColumnTypeOp {
    pub table: String,
    pub column: String,
    pub from_type: String,
    pub to_type: String,
    /// Conversion expression for `USING`, e.g. `"field"::text`
    #[serde(default)]
    pub using: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddConstraintOp {
    pub table: String,
    pub constraint: ConstraintDef,
}

/// Target of a DROP CONSTRAINT: either a name, or columns (and kind) resolved through the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropConstraintOp {
    pub table: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub kind: Option<ConstraintKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddIndexOp {
    pub table: String,
    pub index: IndexDef,
}

/// Target of a DROP INDEX: a name, or columns resolved through the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropIndexOp {
    pub table: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TogetherKind {
    Unique,
    Index,
}

/// Column groups to add and remove; removals are applied first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterColumnsTogetherOp {
    pub table: String,
    pub kind: TogetherKind,
    #[serde(default)]
    pub add: Vec<Vec<String>>,
    #[serde(default)]
    pub remove: Vec<Vec<String>>,
}

/// Column definition for new tables/columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// SQL expression, already rendered (e.g. `'test'` or `now()`)
    #[serde(default)]
    pub default: Option<String>,
    /// The default is re-evaluated per row (`random()`, `clock_timestamp()`)
    #[serde(default)]
    pub volatile_default: bool,
    /// Keep the default in the schema after the column is added
    #[serde(default)]
    pub keep_default: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    /// Plain index on the column
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub references: Option<ForeignKeyRef>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            volatile_default: false,
            keep_default: false,
            primary_key: false,
            unique: false,
            index: false,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKeyRef {
            table: table.into(),
            column: column.into(),
            name: None,
            on_delete: None,
            deferrable: true,
        });
        self
    }

    /// Carries a constraint or index that must be built after the column exists
    pub fn has_inline_objects(&self) -> bool {
        self.primary_key || self.unique || self.index || self.references.is_some()
    }

    /// Operator class for a LIKE-prefix helper index, if the type needs one
    pub fn pattern_ops(&self) -> Option<PatternOps> {
        PatternOps::for_type(&self.data_type)
    }
}

/// Inline foreign key of a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub on_delete: Option<String>,
    #[serde(default = "default_true")]
    pub deferrable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deferrable {
    Deferred,
    Immediate,
}

impl Deferrable {
    pub fn sql(&self) -> &'static str {
        match self {
            Deferrable::Deferred => " DEFERRABLE INITIALLY DEFERRED",
            Deferrable::Immediate => " DEFERRABLE INITIALLY IMMEDIATE",
        }
    }
}

/// Constraint payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase", tag = "kind")]
pub enum ConstraintDef {
    Check {
        #[serde(default)]
        name: Option<String>,
        /// Columns the expression covers; used to derive a default name
        #[serde(default)]
        columns: Vec<String>,
        expression: String,
    },
    Unique {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
        /// Partial unique constraint predicate
        #[serde(default)]
        condition: Option<String>,
        #[serde(default)]
        deferrable: Option<Deferrable>,
    },
    PrimaryKey {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
    },
    ForeignKey {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
        references_table: String,
        references_columns: Vec<String>,
        #[serde(default)]
        on_delete: Option<String>,
        #[serde(default = "default_true")]
        deferrable: bool,
    },
    Exclusion {
        name: String,
        /// Everything after `EXCLUDE`, e.g. `USING GIST ("field1" WITH =)`
        expression: String,
    },
}

impl ConstraintDef {
    pub fn kind(&self) -> ConstraintKind {
        match self {
            ConstraintDef::Check { .. } => ConstraintKind::Check,
            ConstraintDef::Unique { .. } => ConstraintKind::Unique,
            ConstraintDef::PrimaryKey { .. } => ConstraintKind::PrimaryKey,
            ConstraintDef::ForeignKey { .. } => ConstraintKind::ForeignKey,
            ConstraintDef::Exclusion { .. } => ConstraintKind::Exclusion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMethod {
    Btree,
    Hash,
    Gist,
    Spgist,
    Gin,
    Brin,
}

impl IndexMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMethod::Btree => "btree",
            IndexMethod::Hash => "hash",
            IndexMethod::Gist => "gist",
            IndexMethod::Spgist => "spgist",
            IndexMethod::Gin => "gin",
            IndexMethod::Brin => "brin",
        }
    }
}

/// Operator classes that let LIKE-prefix queries use a btree under non-C collations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternOps {
    Varchar,
    Text,
}

impl PatternOps {
    pub fn for_type(data_type: &str) -> Option<Self> {
        let normalized = data_type.trim().to_lowercase();
        if normalized.starts_with("varchar") || normalized.starts_with("character varying") {
            Some(PatternOps::Varchar)
        } else if normalized == "text" {
            Some(PatternOps::Text)
        } else {
            None
        }
    }

    pub fn opclass(&self) -> &'static str {
        match self {
            PatternOps::Varchar => "varchar_pattern_ops",
            PatternOps::Text => "text_pattern_ops",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    /// Defaults to `<table>_<columns>_<digest>`
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<String>,
    /// Operator class per column; empty, or one entry per column
    #[serde(default)]
    pub opclasses: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub method: Option<IndexMethod>,
    #[serde(default)]
    pub condition: Option<String>,
    /// The request is already a CONCURRENTLY build
    #[serde(default)]
    pub concurrently: bool,
    /// Also build a LIKE-prefix helper index for this single text column
    #[serde(default)]
    pub pattern_ops: Option<PatternOps>,
}

impl IndexDef {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            opclasses: Vec::new(),
            unique: false,
            method: None,
            condition: None,
            concurrently: false,
            pattern_ops: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Operation {
    /// Table the operation applies to
    pub fn table(&self) -> &str {
        match self {
            Operation::CreateTable(op) => &op.table,
            Operation::DropTable(op) => &op.table,
            Operation::RenameTable(op) => &op.table,
            Operation::SetTablespace(op) => &op.table,
            Operation::AddColumn(op) => &op.table,
            Operation::DropColumn(op) => &op.table,
            Operation::RenameColumn(op) => &op.table,
            Operation::AlterColumnType(op) => &op.table,
            Operation::SetNotNull(op) | Operation::DropNotNull(op) => &op.table,
            Operation::AddConstraint(op) => &op.table,
            Operation::DropConstraint(op) => &op.table,
            Operation::AddIndex(op) => &op.table,
            Operation::DropIndex(op) => &op.table,
            Operation::AlterColumnsTogether(op) => &op.table,
        }
    }

    /// Short name of the operation kind, for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::CreateTable(_) => "create_table",
            Operation::DropTable(_) => "drop_table",
            Operation::RenameTable(_) => "rename_table",
            Operation::SetTablespace(_) => "set_tablespace",
            Operation::AddColumn(_) => "add_column",
            Operation::DropColumn(_) => "drop_column",
            Operation::RenameColumn(_) => "rename_column",
            Operation::AlterColumnType(_) => "alter_column_type",
            Operation::SetNotNull(_) => "set_not_null",
            Operation::DropNotNull(_) => "drop_not_null",
            Operation::AddConstraint(_) => "add_constraint",
            Operation::DropConstraint(_) => "drop_constraint",
            Operation::AddIndex(_) => "add_index",
            Operation::DropIndex(_) => "drop_index",
            Operation::AlterColumnsTogether(_) => "alter_columns_together",
        }
    }

    /// Every identifier the operation names (tables, columns, objects)
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = vec![self.table()];
        match self {
            Operation::CreateTable(op) => {
                for column in &op.columns {
                    column_identifiers(column, &mut names);
                }
            }
            Operation::DropTable(_) => {}
            Operation::RenameTable(op) => names.push(&op.new_name),
            Operation::SetTablespace(op) => names.push(&op.tablespace),
            Operation::AddColumn(op) => column_identifiers(&op.column, &mut names),
            Operation::DropColumn(op) => names.push(&op.column),
            Operation::RenameColumn(op) => {
                names.push(&op.column);
                names.push(&op.new_name);
            }
            Operation::AlterColumnType(op) => names.push(&op.column),
            Operation::SetNotNull(op) | Operation::DropNotNull(op) => names.push(&op.column),
            Operation::AddConstraint(op) => match &op.constraint {
                ConstraintDef::Check { name, columns, .. } => {
                    names.extend(name.as_deref());
                    names.extend(columns.iter().map(String::as_str));
                }
                ConstraintDef::Unique { name, columns, .. }
                | ConstraintDef::PrimaryKey { name, columns } => {
                    names.extend(name.as_deref());
                    names.extend(columns.iter().map(String::as_str));
                }
                ConstraintDef::ForeignKey {
                    name,
                    columns,
                    references_table,
                    references_columns,
                    ..
                } => {
                    names.extend(name.as_deref());
                    names.extend(columns.iter().map(String::as_str));
                    names.push(references_table);
                    names.extend(references_columns.iter().map(String::as_str));
                }
                ConstraintDef::Exclusion { name, .. } => names.push(name),
            },
            Operation::DropConstraint(op) => {
                names.extend(op.name.as_deref());
                names.extend(op.columns.iter().map(String::as_str));
            }
            Operation::AddIndex(op) => {
                names.extend(op.index.name.as_deref());
                names.extend(op.index.columns.iter().map(String::as_str));
            }
            Operation::DropIndex(op) => {
                names.extend(op.name.as_deref());
                names.extend(op.columns.iter().map(String::as_str));
            }
            Operation::AlterColumnsTogether(op) => {
                for group in op.add.iter().chain(op.remove.iter()) {
                    names.extend(group.iter().map(String::as_str));
                }
            }
        }
        names
    }
}

fn column_identifiers<'a>(column: &'a ColumnDef, names: &mut Vec<&'a str>) {
    names.push(&column.name);
    if let Some(fk) = &column.references {
        names.push(&fk.table);
        names.push(&fk.column);
        names.extend(fk.name.as_deref());
    }
}
