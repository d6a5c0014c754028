//! Statements, plans and classifications
//!
//! A plan is an ordered list of SQL statements. Every statement carries the
//! timeout class that tells the timeout policy how to wrap it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a statement is treated by the timeout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    /// Short ALTER holding an exclusive lock: runs inside a lock/statement timeout region
    Wrapped,
    /// Long-running but lock-light (VALIDATE, CONCURRENTLY builds): only a statement timeout in flexible mode
    FlexibleWrapped,
    /// Never touched by timeout settings
    Unwrapped,
}

/// What a statement does inside a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementRole {
    Ddl,
    TimeoutSet,
    TimeoutReset,
}

/// A single SQL statement ready to be sent verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    pub sql: String,
    pub timeout: TimeoutClass,
    /// Must run in autocommit mode, outside any explicit transaction block
    pub outside_transaction: bool,
    pub role: StatementRole,
}

impl Statement {
    fn new(sql: impl Into<String>, timeout: TimeoutClass) -> Self {
        Self {
            sql: sql.into(),
            timeout,
            outside_transaction: false,
            role: StatementRole::Ddl,
        }
    }

    pub fn wrapped(sql: impl Into<String>) -> Self {
        Self::new(sql, TimeoutClass::Wrapped)
    }

    pub fn flexible(sql: impl Into<String>) -> Self {
        Self::new(sql, TimeoutClass::FlexibleWrapped)
    }

    pub fn unwrapped(sql: impl Into<String>) -> Self {
        Self::new(sql, TimeoutClass::Unwrapped)
    }

    /// Session setting emitted by the timeout policy
    pub fn session(sql: impl Into<String>, role: StatementRole) -> Self {
        Self {
            role,
            ..Self::new(sql, TimeoutClass::Unwrapped)
        }
    }

    /// Mark as a CONCURRENTLY operation
    pub fn outside_transaction(mut self) -> Self {
        self.outside_transaction = true;
        self
    }

    pub fn is_ddl(&self) -> bool {
        self.role == StatementRole::Ddl
    }
}

/// Ordered statements replacing one naive operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    statements: Vec<Statement>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn extend(&mut self, other: Plan) {
        self.statements.extend(other.statements);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// SQL text of every statement, in order
    pub fn sql(&self) -> Vec<&str> {
        self.statements.iter().map(|s| s.sql.as_str()).collect()
    }

    pub fn into_sql(self) -> Vec<String> {
        self.statements.into_iter().map(|s| s.sql).collect()
    }
}

impl From<Vec<Statement>> for Plan {
    fn from(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}

impl IntoIterator for Plan {
    type Item = Statement;
    type IntoIter = std::vec::IntoIter<Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

/// Why an operation has no safe rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsafeReason {
    RenameTable,
    SetTablespace,
    RenameColumn,
    AlterColumnType,
    AddColumnDefault,
    AddColumnNotNull,
    SetNotNull,
    AddExclusionConstraint,
}

impl UnsafeReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            UnsafeReason::RenameTable => "rename_table",
            UnsafeReason::SetTablespace => "set_tablespace",
            UnsafeReason::RenameColumn => "rename_column",
            UnsafeReason::AlterColumnType => "alter_column_type",
            UnsafeReason::AddColumnDefault => "add_column_default",
            UnsafeReason::AddColumnNotNull => "add_column_not_null",
            UnsafeReason::SetNotNull => "set_not_null",
            UnsafeReason::AddExclusionConstraint => "add_exclusion_constraint",
        }
    }

    /// The DDL form that triggered the verdict
    pub fn ddl(&self) -> &'static str {
        match self {
            UnsafeReason::RenameTable => "ALTER TABLE RENAME",
            UnsafeReason::SetTablespace => "ALTER TABLE SET TABLESPACE",
            UnsafeReason::RenameColumn => "ALTER TABLE RENAME COLUMN",
            UnsafeReason::AlterColumnType => "ALTER COLUMN TYPE",
            UnsafeReason::AddColumnDefault => "ADD COLUMN DEFAULT",
            UnsafeReason::AddColumnNotNull => "ADD COLUMN NOT NULL",
            UnsafeReason::SetNotNull => "ALTER COLUMN NOT NULL",
            UnsafeReason::AddExclusionConstraint => "ADD CONSTRAINT EXCLUDE",
        }
    }

    fn detail(&self) -> &'static str {
        match self {
            UnsafeReason::RenameTable => "queries still using the old table name fail",
            UnsafeReason::SetTablespace => "moving a table rewrites it under an exclusive lock",
            UnsafeReason::RenameColumn => "queries still using the old column name fail",
            UnsafeReason::AlterColumnType => {
                "changing the column type rewrites the table under an exclusive lock"
            }
            UnsafeReason::AddColumnDefault => {
                "adding a column with this default rewrites the table under an exclusive lock"
            }
            UnsafeReason::AddColumnNotNull => {
                "a NOT NULL column without a default fails on a populated table"
            }
            UnsafeReason::SetNotNull => "direct SET NOT NULL scans and locks the table",
            UnsafeReason::AddExclusionConstraint => {
                "exclusion constraints are built under an exclusive lock and cannot be added NOT VALID"
            }
        }
    }

    /// Human-readable message
    pub fn message(&self) -> String {
        format!("{} is unsafe operation: {}", self.ddl(), self.detail())
    }
}

impl fmt::Display for UnsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Verdict of the safety classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "reason")]
pub enum Classification {
    Safe,
    /// A rewrite exists and is always applied
    UnsafeFixable,
    /// No safe rewrite exists; policy decides what happens
    UnsafeUnfixable(UnsafeReason),
}

impl Classification {
    pub fn reason(&self) -> Option<UnsafeReason> {
        match self {
            Classification::UnsafeUnfixable(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn is_unfixable(&self) -> bool {
        matches!(self, Classification::UnsafeUnfixable(_))
    }
}
