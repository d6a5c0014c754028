//! Statement planner
//!
//! Rewrites an operation into statements that avoid long ACCESS EXCLUSIVE
//! locks: indexes are built CONCURRENTLY, constraints are added NOT VALID
//! and validated separately, and unique / primary keys are attached to a
//! prebuilt index. Objects a previous, interrupted run already created are
//! skipped so a plan can be re-run.

mod columns;
mod constraints;
mod indexes;
mod sql;

pub use sql::naive;

use crate::catalog::Catalog;
use crate::classifier::Decision;
use crate::error::AppError;
use crate::not_null::NotNullStrategy;
use crate::operation::Operation;
use crate::probe::ServerCaps;
use crate::statement::Plan;

/// Safe statements for `op`.
///
/// Operations without a rewrite fall back to [`naive`]; so does a NOT NULL
/// transition decided as [`NotNullStrategy::DirectUnsafe`].
pub fn plan<C: Catalog + ?Sized>(
    op: &Operation,
    decision: &Decision,
    caps: &ServerCaps,
    catalog: &C,
) -> Result<Plan, AppError> {
    let mut plan = Plan::new();
    match op {
        Operation::AddColumn(add) => columns::add_column(&mut plan, add, caps, catalog)?,
        Operation::SetNotNull(column) => match decision.not_null {
            None | Some(NotNullStrategy::DirectUnsafe) => return naive(op, caps, catalog),
            Some(strategy) => columns::set_not_null(&mut plan, column, strategy, caps, catalog)?,
        },
        Operation::DropNotNull(column) => {
            if !columns::drop_not_null(&mut plan, column, catalog)? {
                return naive(op, caps, catalog);
            }
        }
        Operation::AddConstraint(add) => constraints::add_constraint(&mut plan, add, catalog)?,
        Operation::DropConstraint(drop) => constraints::drop_constraint(&mut plan, drop, caps, catalog)?,
        Operation::AddIndex(add) if !add.index.concurrently => {
            indexes::add_index(&mut plan, add, caps, catalog)?
        }
        Operation::DropIndex(drop) => indexes::drop_index(&mut plan, drop, catalog)?,
        Operation::AlterColumnsTogether(together) => {
            constraints::alter_together(&mut plan, together, catalog)?
        }
        _ => return naive(op, caps, catalog),
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSnapshot;
    use crate::operation::{ColumnRef, RenameColumnOp};
    use crate::statement::Classification;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_direct_not_null_falls_back_to_naive() {
        let op = Operation::SetNotNull(ColumnRef {
            table: "tests_model".to_string(),
            column: "field".to_string(),
        });
        let decision = Decision {
            classification: NotNullStrategy::DirectUnsafe.classification(),
            not_null: Some(NotNullStrategy::DirectUnsafe),
        };
        let plan = plan(&op, &decision, &ServerCaps::default(), &CatalogSnapshot::new()).unwrap();
        assert_eq!(
            plan.sql(),
            vec![r#"ALTER TABLE "tests_model" ALTER COLUMN "field" SET NOT NULL;"#]
        );
    }

    #[test]
    fn test_operations_without_rewrite_use_naive() {
        let op = Operation::RenameColumn(RenameColumnOp {
            table: "tests_model".to_string(),
            column: "field".to_string(),
            new_name: "field".to_string(),
        });
        let decision = Decision {
            classification: Classification::Safe,
            not_null: None,
        };
        let plan = plan(&op, &decision, &ServerCaps::default(), &CatalogSnapshot::new()).unwrap();
        assert!(plan.is_empty());
    }
}
