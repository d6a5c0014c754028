//! Constraint rules

use super::indexes::build_index;
use super::sql::{
    alter_table, check_name, constraint_fk_name, drop_constraint as drop_constraint_sql,
    drop_index, foreign_key_body, primary_key_name, together_index_name, unique_name, IndexSpec,
};
use crate::catalog::{Catalog, ConstraintKind};
use crate::error::AppError;
use crate::naming::{index_name, object_name, quote_ident, PATTERN_OPS_SUFFIX};
use crate::operation::{
    AddConstraintOp, AlterColumnsTogetherOp, ConstraintDef, Deferrable, DropConstraintOp,
    TogetherKind,
};
use crate::probe::ServerCaps;
use crate::statement::{Plan, Statement};
use tracing::debug;

/// Unique or primary key attached to a concurrently built index
pub(super) struct KeySpec<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    pub name: String,
    pub primary: bool,
    /// Partial constraints stay a unique index
    pub condition: Option<&'a str>,
    pub deferrable: Option<Deferrable>,
}

impl<'a> KeySpec<'a> {
    pub fn unique(table: &'a str, columns: &'a [String], name: String) -> Self {
        Self {
            table,
            columns,
            name,
            primary: false,
            condition: None,
            deferrable: None,
        }
    }

    pub fn primary(table: &'a str, columns: &'a [String], name: String) -> Self {
        Self {
            primary: true,
            ..Self::unique(table, columns, name)
        }
    }
}

pub(super) struct ForeignKeySpec<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    pub name: String,
    pub references_table: &'a str,
    pub references_columns: &'a [String],
    pub on_delete: Option<&'a str>,
    pub deferrable: bool,
}

/// ADD CONSTRAINT ... NOT VALID followed by VALIDATE; an existing validated
/// constraint is left alone and a NOT VALID one is only validated
pub(super) fn add_not_valid<C: Catalog + ?Sized>(
    plan: &mut Plan,
    catalog: &C,
    table: &str,
    name: &str,
    body: &str,
) {
    match catalog.constraint(table, name) {
        Some(existing) if existing.validated => {
            debug!("Constraint {} already validated", name);
            return;
        }
        Some(_) => {}
        None => plan.push(Statement::wrapped(alter_table(
            table,
            &format!("ADD CONSTRAINT {} {} NOT VALID", quote_ident(name), body),
        ))),
    }
    plan.push(Statement::flexible(alter_table(
        table,
        &format!("VALIDATE CONSTRAINT {}", quote_ident(name)),
    )));
}

pub(super) fn unique_backed<C: Catalog + ?Sized>(plan: &mut Plan, key: &KeySpec<'_>, catalog: &C) {
    let index = IndexSpec::unique(key.name.clone(), key.table, key.columns, key.condition);
    build_index(plan, &index, catalog);

    if key.condition.is_some() || catalog.constraint(key.table, &key.name).is_some() {
        return;
    }
    plan.push(Statement::wrapped(alter_table(
        key.table,
        &format!(
            "ADD CONSTRAINT {name} {kind} USING INDEX {name}{deferrable}",
            name = quote_ident(&key.name),
            kind = if key.primary { "PRIMARY KEY" } else { "UNIQUE" },
            deferrable = key.deferrable.map(|d| d.sql()).unwrap_or_default(),
        ),
    )));
}

/// Index on the referencing columns, then the constraint NOT VALID and validated
pub(super) fn foreign_key<C: Catalog + ?Sized>(plan: &mut Plan, fk: &ForeignKeySpec<'_>, catalog: &C) {
    if catalog.supporting_index(fk.table, fk.columns).is_none() {
        let index = IndexSpec::plain(index_name(fk.table, fk.columns), fk.table, fk.columns);
        build_index(plan, &index, catalog);
    }
    let body = foreign_key_body(
        fk.columns,
        fk.references_table,
        fk.references_columns,
        fk.on_delete,
        fk.deferrable,
    );
    add_not_valid(plan, catalog, fk.table, &fk.name, &body);
}

pub(super) fn add_constraint<C: Catalog + ?Sized>(
    plan: &mut Plan,
    op: &AddConstraintOp,
    catalog: &C,
) -> Result<(), AppError> {
    let table = op.table.as_str();
    match &op.constraint {
        ConstraintDef::Check {
            name,
            columns,
            expression,
        } => {
            let name = check_name(table, name, columns)?;
            add_not_valid(plan, catalog, table, &name, &format!("CHECK ({})", expression));
        }
        ConstraintDef::Unique {
            name,
            columns,
            condition,
            deferrable,
        } => {
            let key = KeySpec {
                condition: condition.as_deref(),
                deferrable: *deferrable,
                ..KeySpec::unique(table, columns, unique_name(table, name, columns))
            };
            unique_backed(plan, &key, catalog);
        }
        ConstraintDef::PrimaryKey { name, columns } => {
            let key = KeySpec::primary(table, columns, primary_key_name(table, name, columns));
            unique_backed(plan, &key, catalog);

            // Promoting a unique column leaves its LIKE-prefix helper behind
            let promoted = columns.len() == 1
                && catalog.table(table).is_some_and(|entry| {
                    entry
                        .constraints
                        .iter()
                        .any(|c| c.kind == ConstraintKind::Unique && c.columns == *columns)
                });
            if promoted {
                if let Some(like) = catalog.pattern_ops_index(table, &columns[0]) {
                    plan.push(Statement::unwrapped(drop_index(&like.name, true)).outside_transaction());
                }
            }
        }
        ConstraintDef::ForeignKey {
            name,
            columns,
            references_table,
            references_columns,
            on_delete,
            deferrable,
        } => {
            let fk = ForeignKeySpec {
                table,
                columns,
                name: constraint_fk_name(table, name, columns, references_table, references_columns),
                references_table,
                references_columns,
                on_delete: on_delete.as_deref(),
                deferrable: *deferrable,
            };
            foreign_key(plan, &fk, catalog);
        }
        ConstraintDef::Exclusion { name, expression } => {
            plan.push(Statement::unwrapped(alter_table(
                table,
                &format!("ADD CONSTRAINT {} EXCLUDE {}", quote_ident(name), expression),
            )));
        }
    }
    Ok(())
}

/// Constraint a DROP CONSTRAINT resolves to
#[derive(Debug, Clone, PartialEq)]
pub(super) struct DropTarget {
    pub name: String,
    pub kind: Option<ConstraintKind>,
    pub columns: Vec<String>,
}

pub(super) fn resolve_drop_constraint<C: Catalog + ?Sized>(
    op: &DropConstraintOp,
    catalog: &C,
) -> Result<DropTarget, AppError> {
    match &op.name {
        Some(name) => {
            let known = catalog.constraint(&op.table, name);
            let columns = if op.columns.is_empty() {
                known.map(|c| c.columns.clone()).unwrap_or_default()
            } else {
                op.columns.clone()
            };
            Ok(DropTarget {
                name: name.clone(),
                kind: op.kind.or_else(|| known.map(|c| c.kind)),
                columns,
            })
        }
        None => {
            let found = catalog.resolve_constraint(&op.table, &op.columns, op.kind)?;
            Ok(DropTarget {
                name: found.name.clone(),
                kind: Some(found.kind),
                columns: found.columns.clone(),
            })
        }
    }
}

pub(super) fn drop_constraint<C: Catalog + ?Sized>(
    plan: &mut Plan,
    op: &DropConstraintOp,
    caps: &ServerCaps,
    catalog: &C,
) -> Result<(), AppError> {
    let target = resolve_drop_constraint(op, catalog)?;
    plan.push(Statement::wrapped(drop_constraint_sql(&op.table, &target.name)));

    let index_backed = target.kind.is_some_and(|k| k.is_index_backed());
    if !index_backed || target.columns.len() != 1 {
        return Ok(());
    }

    let like = match catalog.pattern_ops_index(&op.table, &target.columns[0]) {
        Some(index) => Some(index.name.clone()),
        None if catalog.table(&op.table).is_none() && !caps.c_collation => {
            Some(object_name(&op.table, &target.columns, PATTERN_OPS_SUFFIX))
        }
        None => None,
    };
    if let Some(like) = like {
        plan.push(Statement::unwrapped(drop_index(&like, true)).outside_transaction());
    }
    Ok(())
}

/// Removals first, then each added group
pub(super) fn alter_together<C: Catalog + ?Sized>(
    plan: &mut Plan,
    op: &AlterColumnsTogetherOp,
    catalog: &C,
) -> Result<(), AppError> {
    let table = op.table.as_str();
    for group in &op.remove {
        match op.kind {
            TogetherKind::Unique => {
                let found = catalog.resolve_constraint(table, group, Some(ConstraintKind::Unique))?;
                plan.push(Statement::wrapped(drop_constraint_sql(table, &found.name)));
            }
            TogetherKind::Index => {
                let found = catalog.resolve_index(table, group)?;
                plan.push(Statement::unwrapped(drop_index(&found.name, true)).outside_transaction());
            }
        }
    }

    for group in &op.add {
        match op.kind {
            TogetherKind::Unique => {
                let key = KeySpec::unique(table, group, unique_name(table, &None, group));
                unique_backed(plan, &key, catalog);
            }
            TogetherKind::Index => {
                let index = IndexSpec::plain(together_index_name(table, group), table, group);
                build_index(plan, &index, catalog);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, ConstraintInfo, IndexInfo, TableCatalog};
    use crate::statement::TimeoutClass;
    use pretty_assertions::assert_eq;

    fn constraint(name: &str, kind: ConstraintKind, columns: &[&str]) -> ConstraintInfo {
        ConstraintInfo {
            name: name.to_string(),
            kind,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            validated: true,
            index: None,
        }
    }

    fn like_index(name: &str, column: &str) -> IndexInfo {
        IndexInfo {
            name: name.to_string(),
            columns: vec![column.to_string()],
            opclasses: vec!["varchar_pattern_ops".to_string()],
            unique: false,
            primary: false,
            valid: true,
            partitioned: false,
            constraint: None,
        }
    }

    fn add(constraint: ConstraintDef) -> AddConstraintOp {
        AddConstraintOp {
            table: "tests_model".to_string(),
            constraint,
        }
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_unique_on_two_columns() {
        let mut plan = Plan::new();
        let op = add(ConstraintDef::Unique {
            name: None,
            columns: columns(&["field1", "field2"]),
            condition: None,
            deferrable: None,
        });
        add_constraint(&mut plan, &op, &CatalogSnapshot::new()).unwrap();

        assert_eq!(
            plan.sql(),
            vec![
                r#"CREATE UNIQUE INDEX CONCURRENTLY "tests_model_field1_field2_51878e08_uniq" ON "tests_model" ("field1", "field2");"#,
                r#"ALTER TABLE "tests_model" ADD CONSTRAINT "tests_model_field1_field2_51878e08_uniq" UNIQUE USING INDEX "tests_model_field1_field2_51878e08_uniq";"#,
            ]
        );
        assert_eq!(plan.statements()[0].timeout, TimeoutClass::FlexibleWrapped);
        assert_eq!(plan.statements()[1].timeout, TimeoutClass::Wrapped);
    }

    #[test]
    fn test_deferrable_and_partial_unique() {
        let mut plan = Plan::new();
        let op = add(ConstraintDef::Unique {
            name: Some("field1_uniq".to_string()),
            columns: columns(&["field1"]),
            condition: None,
            deferrable: Some(Deferrable::Immediate),
        });
        add_constraint(&mut plan, &op, &CatalogSnapshot::new()).unwrap();
        assert_eq!(
            plan.sql()[1],
            r#"ALTER TABLE "tests_model" ADD CONSTRAINT "field1_uniq" UNIQUE USING INDEX "field1_uniq" DEFERRABLE INITIALLY IMMEDIATE;"#
        );

        let mut plan = Plan::new();
        let op = add(ConstraintDef::Unique {
            name: Some("field1_uniq".to_string()),
            columns: columns(&["field1"]),
            condition: Some(r#""field1" > 0"#.to_string()),
            deferrable: None,
        });
        add_constraint(&mut plan, &op, &CatalogSnapshot::new()).unwrap();
        assert_eq!(
            plan.sql(),
            vec![r#"CREATE UNIQUE INDEX CONCURRENTLY "field1_uniq" ON "tests_model" ("field1") WHERE "field1" > 0;"#]
        );
    }

    #[test]
    fn test_check_constraint() {
        let mut plan = Plan::new();
        let op = add(ConstraintDef::Check {
            name: None,
            columns: columns(&["field"]),
            expression: r#""field" >= 0"#.to_string(),
        });
        add_constraint(&mut plan, &op, &CatalogSnapshot::new()).unwrap();

        assert_eq!(
            plan.sql(),
            vec![
                r#"ALTER TABLE "tests_model" ADD CONSTRAINT "tests_model_field_0a53d95f_check" CHECK ("field" >= 0) NOT VALID;"#,
                r#"ALTER TABLE "tests_model" VALIDATE CONSTRAINT "tests_model_field_0a53d95f_check";"#,
            ]
        );

        let unnamed = add(ConstraintDef::Check {
            name: None,
            columns: Vec::new(),
            expression: "true".to_string(),
        });
        assert!(matches!(
            add_constraint(&mut Plan::new(), &unnamed, &CatalogSnapshot::new()),
            Err(AppError::Precondition(_))
        ));
    }

    #[test]
    fn test_foreign_key_uses_existing_index() {
        let existing = IndexInfo {
            opclasses: Vec::new(),
            ..like_index("tests_model_field_id_idx", "field_id")
        };
        let catalog = CatalogSnapshot::new().with_table("tests_model", TableCatalog::default().with_index(existing));

        let mut plan = Plan::new();
        let op = add(ConstraintDef::ForeignKey {
            name: Some("field_id_fk".to_string()),
            columns: columns(&["field_id"]),
            references_table: "tests_model2".to_string(),
            references_columns: columns(&["id"]),
            on_delete: Some("CASCADE".to_string()),
            deferrable: false,
        });
        add_constraint(&mut plan, &op, &catalog).unwrap();

        assert_eq!(
            plan.sql(),
            vec![
                r#"ALTER TABLE "tests_model" ADD CONSTRAINT "field_id_fk" FOREIGN KEY ("field_id") REFERENCES "tests_model2" ("id") ON DELETE CASCADE NOT VALID;"#,
                r#"ALTER TABLE "tests_model" VALIDATE CONSTRAINT "field_id_fk";"#,
            ]
        );
    }

    #[test]
    fn test_resume_skips_finished_steps() {
        let mut not_valid = constraint("field_id_fk", ConstraintKind::ForeignKey, &["field_id"]);
        not_valid.validated = false;
        let catalog = CatalogSnapshot::new().with_table(
            "tests_model",
            TableCatalog::default()
                .with_constraint(not_valid)
                .with_index(IndexInfo {
                    opclasses: Vec::new(),
                    ..like_index("some_idx", "field_id")
                }),
        );

        let mut plan = Plan::new();
        let op = add(ConstraintDef::ForeignKey {
            name: Some("field_id_fk".to_string()),
            columns: columns(&["field_id"]),
            references_table: "tests_model2".to_string(),
            references_columns: columns(&["id"]),
            on_delete: None,
            deferrable: true,
        });
        add_constraint(&mut plan, &op, &catalog).unwrap();
        assert_eq!(
            plan.sql(),
            vec![r#"ALTER TABLE "tests_model" VALIDATE CONSTRAINT "field_id_fk";"#]
        );
    }

    #[test]
    fn test_promote_unique_to_primary_key() {
        let catalog = CatalogSnapshot::new().with_table(
            "tests_model",
            TableCatalog::default()
                .with_constraint(constraint("field_uniq", ConstraintKind::Unique, &["field"]))
                .with_index(like_index("tests_model_field_0a53d95f_like", "field")),
        );

        let mut plan = Plan::new();
        let op = add(ConstraintDef::PrimaryKey {
            name: None,
            columns: columns(&["field"]),
        });
        add_constraint(&mut plan, &op, &catalog).unwrap();

        assert_eq!(
            plan.sql(),
            vec![
                r#"CREATE UNIQUE INDEX CONCURRENTLY "tests_model_field_0a53d95f_pk" ON "tests_model" ("field");"#,
                r#"ALTER TABLE "tests_model" ADD CONSTRAINT "tests_model_field_0a53d95f_pk" PRIMARY KEY USING INDEX "tests_model_field_0a53d95f_pk";"#,
                r#"DROP INDEX CONCURRENTLY IF EXISTS "tests_model_field_0a53d95f_like";"#,
            ]
        );
        assert_eq!(plan.statements()[2].timeout, TimeoutClass::Unwrapped);
    }

    #[test]
    fn test_drop_unique_constraint_with_like_index() {
        let catalog = CatalogSnapshot::new().with_table(
            "tests_model",
            TableCatalog::default()
                .with_constraint(constraint("field_uniq", ConstraintKind::Unique, &["field"]))
                .with_index(like_index("field_like", "field")),
        );
        let op = DropConstraintOp {
            table: "tests_model".to_string(),
            name: None,
            columns: columns(&["field"]),
            kind: Some(ConstraintKind::Unique),
        };

        let mut plan = Plan::new();
        drop_constraint(&mut plan, &op, &ServerCaps::default(), &catalog).unwrap();
        assert_eq!(
            plan.sql(),
            vec![
                r#"ALTER TABLE "tests_model" DROP CONSTRAINT "field_uniq";"#,
                r#"DROP INDEX CONCURRENTLY IF EXISTS "field_like";"#,
            ]
        );
    }

    #[test]
    fn test_drop_named_constraint_without_catalog() {
        let op = DropConstraintOp {
            table: "tests_model".to_string(),
            name: Some("tests_model_field_0a53d95f_uniq".to_string()),
            columns: columns(&["field"]),
            kind: Some(ConstraintKind::Unique),
        };

        let mut plan = Plan::new();
        drop_constraint(&mut plan, &op, &ServerCaps::default(), &CatalogSnapshot::new()).unwrap();
        assert_eq!(
            plan.sql(),
            vec![
                r#"ALTER TABLE "tests_model" DROP CONSTRAINT "tests_model_field_0a53d95f_uniq";"#,
                r#"DROP INDEX CONCURRENTLY IF EXISTS "tests_model_field_0a53d95f_like";"#,
            ]
        );

        let check = DropConstraintOp {
            kind: Some(ConstraintKind::Check),
            ..op
        };
        let mut plan = Plan::new();
        drop_constraint(&mut plan, &check, &ServerCaps::default(), &CatalogSnapshot::new()).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_alter_unique_together() {
        let catalog = CatalogSnapshot::new().with_table(
            "tests_model",
            TableCatalog::default().with_constraint(constraint(
                "old_uniq",
                ConstraintKind::Unique,
                &["field1", "field2"],
            )),
        );
        let op = AlterColumnsTogetherOp {
            table: "tests_model".to_string(),
            kind: TogetherKind::Unique,
            add: vec![columns(&["field1", "field2"])],
            remove: vec![columns(&["field1", "field2"])],
        };

        let mut plan = Plan::new();
        alter_together(&mut plan, &op, &catalog).unwrap();
        assert_eq!(
            plan.sql(),
            vec![
                r#"ALTER TABLE "tests_model" DROP CONSTRAINT "old_uniq";"#,
                r#"CREATE UNIQUE INDEX CONCURRENTLY "tests_model_field1_field2_51878e08_uniq" ON "tests_model" ("field1", "field2");"#,
                r#"ALTER TABLE "tests_model" ADD CONSTRAINT "tests_model_field1_field2_51878e08_uniq" UNIQUE USING INDEX "tests_model_field1_field2_51878e08_uniq";"#,
            ]
        );
    }

    #[test]
    fn test_alter_index_together() {
        let op = AlterColumnsTogetherOp {
            table: "tests_model".to_string(),
            kind: TogetherKind::Index,
            add: vec![columns(&["field1", "field2"])],
            remove: Vec::new(),
        };

        let mut plan = Plan::new();
        alter_together(&mut plan, &op, &CatalogSnapshot::new()).unwrap();
        assert_eq!(
            plan.sql(),
            vec![r#"CREATE INDEX CONCURRENTLY "tests_model_field1_field2_51878e08_idx" ON "tests_model" ("field1", "field2");"#]
        );
    }
}
