//! Column rules

use super::constraints::{add_not_valid, foreign_key, unique_backed, ForeignKeySpec, KeySpec};
use super::indexes::build_index;
use super::sql::{
    alter_table, column_definition, drop_constraint, drop_default, foreign_key_ref_name,
    primary_key_name, set_not_null as set_not_null_sql, unique_name, IndexSpec,
};
use crate::catalog::Catalog;
use crate::error::AppError;
use crate::naming::{index_name, object_name, quote_ident, quote_literal, NOT_NULL_SUFFIX};
use crate::not_null::NotNullStrategy;
use crate::operation::{AddColumnOp, ColumnRef};
use crate::probe::ServerCaps;
use crate::statement::{Plan, Statement};
use tracing::debug;

/// ADD COLUMN without inline objects, then each object built the safe way
pub(super) fn add_column<C: Catalog + ?Sized>(
    plan: &mut Plan,
    op: &AddColumnOp,
    caps: &ServerCaps,
    catalog: &C,
) -> Result<(), AppError> {
    let table = op.table.as_str();
    let column = &op.column;
    let columns = std::slice::from_ref(&column.name);

    plan.push(Statement::wrapped(alter_table(
        table,
        &format!("ADD COLUMN {}", column_definition(table, column, false)),
    )));
    if column.default.is_some() && !column.keep_default {
        plan.push(Statement::wrapped(drop_default(table, &column.name)));
    }

    if column.primary_key {
        let key = KeySpec::primary(table, columns, primary_key_name(table, &None, columns));
        unique_backed(plan, &key, catalog);
    } else if column.unique {
        let key = KeySpec::unique(table, columns, unique_name(table, &None, columns));
        unique_backed(plan, &key, catalog);
    }

    if let Some(fk) = &column.references {
        let spec = ForeignKeySpec {
            table,
            columns,
            name: foreign_key_ref_name(table, column, fk),
            references_table: &fk.table,
            references_columns: std::slice::from_ref(&fk.column),
            on_delete: fk.on_delete.as_deref(),
            deferrable: fk.deferrable,
        };
        foreign_key(plan, &spec, catalog);
    } else if column.index && !column.primary_key && !column.unique {
        build_index(plan, &IndexSpec::plain(index_name(table, columns), table, columns), catalog);
    }

    if column.has_inline_objects() && !caps.c_collation {
        if let Some(ops) = column.pattern_ops() {
            build_index(plan, &IndexSpec::pattern_ops(table, columns, ops), catalog);
        }
    }
    Ok(())
}

/// Prove NOT NULL with a validated CHECK, then make it the column flag
pub(super) fn set_not_null<C: Catalog + ?Sized>(
    plan: &mut Plan,
    op: &ColumnRef,
    strategy: NotNullStrategy,
    caps: &ServerCaps,
    catalog: &C,
) -> Result<(), AppError> {
    let table = op.table.as_str();
    if strategy == NotNullStrategy::DirectUnsafe {
        plan.push(Statement::wrapped(set_not_null_sql(table, &op.column)));
        return Ok(());
    }

    let helper = object_name(table, &[&op.column], NOT_NULL_SUFFIX);
    let helper_exists = catalog.constraint(table, &helper).is_some();

    if let Some(column) = catalog.column(table, &op.column) {
        if column.not_null && !helper_exists {
            debug!("{}.{} is already NOT NULL", table, op.column);
            return Ok(());
        }
    }

    add_not_valid(
        plan,
        catalog,
        table,
        &helper,
        &format!("CHECK ({} IS NOT NULL)", quote_ident(&op.column)),
    );

    match strategy {
        NotNullStrategy::ConstraintAssisted if caps.set_not_null_uses_check() => {
            plan.push(Statement::wrapped(set_not_null_sql(table, &op.column)));
            plan.push(Statement::wrapped(drop_constraint(table, &helper)));
        }
        // Older servers would rescan on SET NOT NULL; the validated check stands in
        NotNullStrategy::ConstraintAssisted => {}
        NotNullStrategy::PgAttributeHack | NotNullStrategy::DirectUnsafe => {
            plan.push(Statement::unwrapped(format!(
                "UPDATE pg_catalog.pg_attribute SET attnotnull = TRUE \
                 WHERE attrelid = {}::regclass::oid AND attname = {};",
                quote_literal(&quote_ident(table)),
                quote_literal(&op.column)
            )));
            plan.push(Statement::wrapped(drop_constraint(table, &helper)));
        }
    }
    Ok(())
}

/// Drop the helper CHECK standing in for NOT NULL; `false` if there is none
pub(super) fn drop_not_null<C: Catalog + ?Sized>(
    plan: &mut Plan,
    op: &ColumnRef,
    catalog: &C,
) -> Result<bool, AppError> {
    match catalog.not_null_check(&op.table, &op.column)? {
        Some(check) => {
            plan.push(Statement::wrapped(drop_constraint(&op.table, &check.name)));
            Ok(true)
        }
        None => Ok(false),
    }
}
