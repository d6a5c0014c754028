//! SQL rendering
//!
//! Statement text shared by the rewrite rules, and the naive baseline: the
//! statements a migrator with no lock awareness would send for an operation.

use super::constraints::resolve_drop_constraint;
use crate::catalog::{Catalog, ConstraintKind};
use crate::error::{precondition_error, AppError};
use crate::naming::{
    foreign_key_name, index_name, object_name, quote_columns, quote_ident, CHECK_SUFFIX,
    PATTERN_OPS_SUFFIX, PRIMARY_KEY_SUFFIX, TOGETHER_INDEX_SUFFIX, UNIQUE_SUFFIX,
};
use crate::operation::*;
use crate::probe::ServerCaps;
use crate::statement::{Plan, Statement};

/// Everything needed to render a CREATE INDEX
#[derive(Debug, Clone)]
pub(crate) struct IndexSpec<'a> {
    pub name: String,
    pub table: &'a str,
    pub columns: &'a [String],
    pub opclasses: Vec<String>,
    pub unique: bool,
    pub method: Option<IndexMethod>,
    pub condition: Option<&'a str>,
}

impl<'a> IndexSpec<'a> {
    pub fn plain(name: String, table: &'a str, columns: &'a [String]) -> Self {
        Self {
            name,
            table,
            columns,
            opclasses: Vec::new(),
            unique: false,
            method: None,
            condition: None,
        }
    }

    pub fn unique(name: String, table: &'a str, columns: &'a [String], condition: Option<&'a str>) -> Self {
        Self {
            unique: true,
            condition,
            ..Self::plain(name, table, columns)
        }
    }

    /// LIKE-prefix helper on a single text column
    pub fn pattern_ops(table: &'a str, columns: &'a [String], ops: PatternOps) -> Self {
        Self {
            opclasses: vec![ops.opclass().to_string()],
            ..Self::plain(object_name(table, columns, PATTERN_OPS_SUFFIX), table, columns)
        }
    }

    pub fn from_def(def: &'a IndexDef, table: &'a str) -> Result<Self, AppError> {
        if !def.opclasses.is_empty() && def.opclasses.len() != def.columns.len() {
            return Err(precondition_error(format!(
                "index on {} lists {} operator classes for {} columns",
                table,
                def.opclasses.len(),
                def.columns.len()
            )));
        }
        Ok(Self {
            name: def.name.clone().unwrap_or_else(|| index_name(table, &def.columns)),
            table,
            columns: &def.columns,
            opclasses: def.opclasses.clone(),
            unique: def.unique,
            method: def.method,
            condition: def.condition.as_deref(),
        })
    }
}

pub(crate) fn create_index(spec: &IndexSpec<'_>, concurrently: bool) -> String {
    let columns = spec
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| match spec.opclasses.get(i) {
            Some(opclass) => format!("{} {}", quote_ident(column), opclass),
            None => quote_ident(column),
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE {}INDEX{} {} ON {}{} ({}){};",
        if spec.unique { "UNIQUE " } else { "" },
        if concurrently { " CONCURRENTLY" } else { "" },
        quote_ident(&spec.name),
        quote_ident(spec.table),
        spec.method.map(|m| format!(" USING {}", m.as_str())).unwrap_or_default(),
        columns,
        spec.condition.map(|c| format!(" WHERE {}", c)).unwrap_or_default(),
    )
}

pub(crate) fn drop_index(name: &str, concurrently: bool) -> String {
    format!(
        "DROP INDEX{} IF EXISTS {};",
        if concurrently { " CONCURRENTLY" } else { "" },
        quote_ident(name)
    )
}

pub(crate) fn alter_table(table: &str, action: &str) -> String {
    format!("ALTER TABLE {} {};", quote_ident(table), action)
}

pub(crate) fn drop_constraint(table: &str, name: &str) -> String {
    alter_table(table, &format!("DROP CONSTRAINT {}", quote_ident(name)))
}

pub(crate) fn drop_default(table: &str, column: &str) -> String {
    alter_table(table, &format!("ALTER COLUMN {} DROP DEFAULT", quote_ident(column)))
}

pub(crate) fn set_not_null(table: &str, column: &str) -> String {
    alter_table(table, &format!("ALTER COLUMN {} SET NOT NULL", quote_ident(column)))
}

/// `FOREIGN KEY ("a") REFERENCES "t" ("id") ...`
pub(crate) fn foreign_key_body(
    columns: &[String],
    references_table: &str,
    references_columns: &[String],
    on_delete: Option<&str>,
    deferrable: bool,
) -> String {
    format!(
        "FOREIGN KEY ({}) REFERENCES {} ({}){}{}",
        quote_columns(columns),
        quote_ident(references_table),
        quote_columns(references_columns),
        on_delete.map(|a| format!(" ON DELETE {}", a)).unwrap_or_default(),
        if deferrable { Deferrable::Deferred.sql() } else { "" },
    )
}

/// Column definition; `inline` renders key, unique and reference clauses too
pub(crate) fn column_definition(table: &str, column: &ColumnDef, inline: bool) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), column.data_type);
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT {}", default));
    }
    sql.push_str(if column.nullable { " NULL" } else { " NOT NULL" });

    if inline {
        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if column.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(fk) = &column.references {
            let name = foreign_key_ref_name(table, column, fk);
            sql.push_str(&format!(
                " CONSTRAINT {} REFERENCES {} ({}){}{}",
                quote_ident(&name),
                quote_ident(&fk.table),
                quote_ident(&fk.column),
                fk.on_delete
                    .as_deref()
                    .map(|a| format!(" ON DELETE {}", a))
                    .unwrap_or_default(),
                if fk.deferrable { Deferrable::Deferred.sql() } else { "" },
            ));
        }
    }
    sql
}

pub(crate) fn foreign_key_ref_name(table: &str, column: &ColumnDef, fk: &ForeignKeyRef) -> String {
    fk.name
        .clone()
        .unwrap_or_else(|| foreign_key_name(table, &[&column.name], &fk.table, &fk.column))
}

pub(crate) fn check_name(table: &str, name: &Option<String>, columns: &[String]) -> Result<String, AppError> {
    match (name, columns.is_empty()) {
        (Some(name), _) => Ok(name.clone()),
        (None, false) => Ok(object_name(table, columns, CHECK_SUFFIX)),
        (None, true) => Err(precondition_error(format!(
            "check constraint on {} needs a name or the columns it covers",
            table
        ))),
    }
}

pub(crate) fn unique_name(table: &str, name: &Option<String>, columns: &[String]) -> String {
    name.clone().unwrap_or_else(|| object_name(table, columns, UNIQUE_SUFFIX))
}

pub(crate) fn primary_key_name(table: &str, name: &Option<String>, columns: &[String]) -> String {
    name.clone().unwrap_or_else(|| object_name(table, columns, PRIMARY_KEY_SUFFIX))
}

pub(crate) fn together_index_name(table: &str, columns: &[String]) -> String {
    object_name(table, columns, TOGETHER_INDEX_SUFFIX)
}

pub(crate) fn constraint_fk_name(
    table: &str,
    name: &Option<String>,
    columns: &[String],
    references_table: &str,
    references_columns: &[String],
) -> String {
    name.clone().unwrap_or_else(|| {
        let to_column = references_columns.first().map(String::as_str).unwrap_or_default();
        foreign_key_name(table, columns, references_table, to_column)
    })
}

/// Plain and LIKE-prefix indexes a column definition asks for, non-concurrently
fn column_indexes(table: &str, column: &ColumnDef, caps: &ServerCaps) -> Vec<String> {
    let columns = std::slice::from_ref(&column.name);
    let mut sql = Vec::new();
    if (column.index || column.references.is_some()) && !column.primary_key && !column.unique {
        sql.push(create_index(&IndexSpec::plain(index_name(table, columns), table, columns), false));
    }
    if column.has_inline_objects() && !caps.c_collation {
        if let Some(ops) = column.pattern_ops() {
            sql.push(create_index(&IndexSpec::pattern_ops(table, columns, ops), false));
        }
    }
    sql
}

/// Statements a lock-unaware migrator would send for `op`
pub fn naive<C: Catalog + ?Sized>(op: &Operation, caps: &ServerCaps, catalog: &C) -> Result<Plan, AppError> {
    let mut plan = Plan::new();
    match op {
        Operation::CreateTable(op) => {
            let columns = op
                .columns
                .iter()
                .map(|c| column_definition(&op.table, c, true))
                .collect::<Vec<_>>()
                .join(", ");
            plan.push(Statement::unwrapped(format!(
                "CREATE TABLE {} ({});",
                quote_ident(&op.table),
                columns
            )));
            for column in &op.columns {
                for sql in column_indexes(&op.table, column, caps) {
                    plan.push(Statement::unwrapped(sql));
                }
            }
        }
        Operation::DropTable(op) => {
            plan.push(Statement::unwrapped(format!(
                "DROP TABLE {}{};",
                quote_ident(&op.table),
                if op.cascade { " CASCADE" } else { "" }
            )));
        }
        Operation::RenameTable(op) => {
            if op.table != op.new_name {
                plan.push(Statement::wrapped(alter_table(
                    &op.table,
                    &format!("RENAME TO {}", quote_ident(&op.new_name)),
                )));
            }
        }
        Operation::SetTablespace(op) => {
            plan.push(Statement::wrapped(alter_table(
                &op.table,
                &format!("SET TABLESPACE {}", quote_ident(&op.tablespace)),
            )));
        }
        Operation::AddColumn(op) => {
            let column = &op.column;
            plan.push(Statement::wrapped(alter_table(
                &op.table,
                &format!("ADD COLUMN {}", column_definition(&op.table, column, true)),
            )));
            if column.default.is_some() && !column.keep_default {
                plan.push(Statement::wrapped(drop_default(&op.table, &column.name)));
            }
            for sql in column_indexes(&op.table, column, caps) {
                plan.push(Statement::wrapped(sql));
            }
        }
        Operation::DropColumn(op) => {
            plan.push(Statement::wrapped(alter_table(
                &op.table,
                &format!(
                    "DROP COLUMN {}{}",
                    quote_ident(&op.column),
                    if op.cascade { " CASCADE" } else { "" }
                ),
            )));
        }
        Operation::RenameColumn(op) => {
            if op.column != op.new_name {
                plan.push(Statement::wrapped(alter_table(
                    &op.table,
                    &format!(
                        "RENAME COLUMN {} TO {}",
                        quote_ident(&op.column),
                        quote_ident(&op.new_name)
                    ),
                )));
            }
        }
        Operation::AlterColumnType(op) => {
            plan.push(Statement::wrapped(alter_table(
                &op.table,
                &format!(
                    "ALTER COLUMN {} TYPE {}{}",
                    quote_ident(&op.column),
                    op.to_type,
                    op.using.as_deref().map(|u| format!(" USING {}", u)).unwrap_or_default()
                ),
            )));
        }
        Operation::SetNotNull(op) => {
            plan.push(Statement::wrapped(set_not_null(&op.table, &op.column)));
        }
        Operation::DropNotNull(op) => {
            plan.push(Statement::wrapped(alter_table(
                &op.table,
                &format!("ALTER COLUMN {} DROP NOT NULL", quote_ident(&op.column)),
            )));
        }
        Operation::AddConstraint(op) => {
            plan.push(naive_add_constraint(&op.table, &op.constraint)?);
        }
        Operation::DropConstraint(op) => {
            let target = resolve_drop_constraint(op, catalog)?;
            plan.push(Statement::wrapped(drop_constraint(&op.table, &target.name)));
        }
        Operation::AddIndex(op) => {
            let spec = IndexSpec::from_def(&op.index, &op.table)?;
            let sql = create_index(&spec, op.index.concurrently);
            plan.push(if op.index.concurrently {
                Statement::flexible(sql).outside_transaction()
            } else {
                Statement::wrapped(sql)
            });
        }
        Operation::DropIndex(op) => {
            let name = match &op.name {
                Some(name) => name.clone(),
                None => catalog.resolve_index(&op.table, &op.columns)?.name.clone(),
            };
            plan.push(Statement::wrapped(drop_index(&name, false)));
        }
        Operation::AlterColumnsTogether(op) => {
            for group in &op.remove {
                match op.kind {
                    TogetherKind::Unique => {
                        let found = catalog.resolve_constraint(&op.table, group, Some(ConstraintKind::Unique))?;
                        plan.push(Statement::wrapped(drop_constraint(&op.table, &found.name)));
                    }
                    TogetherKind::Index => {
                        let found = catalog.resolve_index(&op.table, group)?;
                        plan.push(Statement::wrapped(drop_index(&found.name, false)));
                    }
                }
            }
            for group in &op.add {
                let sql = match op.kind {
                    TogetherKind::Unique => alter_table(
                        &op.table,
                        &format!(
                            "ADD CONSTRAINT {} UNIQUE ({})",
                            quote_ident(&unique_name(&op.table, &None, group)),
                            quote_columns(group)
                        ),
                    ),
                    TogetherKind::Index => create_index(
                        &IndexSpec::plain(together_index_name(&op.table, group), &op.table, group),
                        false,
                    ),
                };
                plan.push(Statement::wrapped(sql));
            }
        }
    }
    Ok(plan)
}

fn naive_add_constraint(table: &str, constraint: &ConstraintDef) -> Result<Statement, AppError> {
    let action = match constraint {
        ConstraintDef::Check {
            name,
            columns,
            expression,
        } => format!(
            "ADD CONSTRAINT {} CHECK ({})",
            quote_ident(&check_name(table, name, columns)?),
            expression
        ),
        ConstraintDef::Unique {
            name,
            columns,
            condition: Some(condition),
            ..
        } => {
            let spec = IndexSpec::unique(
                unique_name(table, name, columns),
                table,
                columns,
                Some(condition.as_str()),
            );
            return Ok(Statement::wrapped(create_index(&spec, false)));
        }
        ConstraintDef::Unique {
            name,
            columns,
            deferrable,
            ..
        } => format!(
            "ADD CONSTRAINT {} UNIQUE ({}){}",
            quote_ident(&unique_name(table, name, columns)),
            quote_columns(columns),
            deferrable.map(|d| d.sql()).unwrap_or_default()
        ),
        ConstraintDef::PrimaryKey { name, columns } => format!(
            "ADD CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&primary_key_name(table, name, columns)),
            quote_columns(columns)
        ),
        ConstraintDef::ForeignKey {
            name,
            columns,
            references_table,
            references_columns,
            on_delete,
            deferrable,
        } => format!(
            "ADD CONSTRAINT {} {}",
            quote_ident(&constraint_fk_name(table, name, columns, references_table, references_columns)),
            foreign_key_body(columns, references_table, references_columns, on_delete.as_deref(), *deferrable)
        ),
        ConstraintDef::Exclusion { name, expression } => {
            return Ok(Statement::unwrapped(alter_table(
                table,
                &format!("ADD CONSTRAINT {} EXCLUDE {}", quote_ident(name), expression),
            )));
        }
    };
    Ok(Statement::wrapped(alter_table(table, &action)))
}
