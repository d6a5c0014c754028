//! Index rules

use super::sql::{create_index, drop_index as drop_index_sql, IndexSpec};
use crate::catalog::Catalog;
use crate::error::{precondition_error, AppError};
use crate::operation::{AddIndexOp, DropIndexOp};
use crate::probe::ServerCaps;
use crate::statement::{Plan, Statement};

/// CREATE INDEX CONCURRENTLY, skipping a valid index of the same name and
/// clearing out an invalid one left by an interrupted build
pub(super) fn build_index<C: Catalog + ?Sized>(plan: &mut Plan, spec: &IndexSpec<'_>, catalog: &C) {
    match catalog.index(spec.table, &spec.name) {
        Some(existing) if existing.valid => return,
        Some(_) => plan.push(Statement::unwrapped(drop_index_sql(&spec.name, true)).outside_transaction()),
        None => {}
    }
    plan.push(Statement::flexible(create_index(spec, true)).outside_transaction());
}

pub(super) fn add_index<C: Catalog + ?Sized>(
    plan: &mut Plan,
    op: &AddIndexOp,
    caps: &ServerCaps,
    catalog: &C,
) -> Result<(), AppError> {
    let spec = IndexSpec::from_def(&op.index, &op.table)?;
    build_index(plan, &spec, catalog);

    if let Some(ops) = op.index.pattern_ops {
        if op.index.columns.len() == 1 && !caps.c_collation {
            build_index(plan, &IndexSpec::pattern_ops(&op.table, &op.index.columns, ops), catalog);
        }
    }
    Ok(())
}

pub(super) fn drop_index<C: Catalog + ?Sized>(
    plan: &mut Plan,
    op: &DropIndexOp,
    catalog: &C,
) -> Result<(), AppError> {
    let name = match &op.name {
        Some(name) => name.clone(),
        None => catalog.resolve_index(&op.table, &op.columns)?.name.clone(),
    };

    match catalog.index(&op.table, &name) {
        Some(existing) => {
            if let Some(constraint) = &existing.constraint {
                return Err(precondition_error(format!(
                    "index {} backs constraint {}; drop the constraint instead",
                    name, constraint
                )));
            }
            if existing.partitioned {
                plan.push(Statement::wrapped(drop_index_sql(&name, false)));
                return Ok(());
            }
        }
        None => {}
    }
    plan.push(Statement::unwrapped(drop_index_sql(&name, true)).outside_transaction());
    Ok(())
}
