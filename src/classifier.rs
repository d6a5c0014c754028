//! Safety classifier
//!
//! Pure rule table deciding, per operation, whether the naive statement is
//! safe to run under live traffic, has a safe rewrite, or has none.

use crate::config::PlannerConfig;
use crate::not_null::{select_strategy, NotNullStrategy};
use crate::operation::{AlterColumnTypeOp, ConstraintDef, Operation};
use crate::probe::{RowEstimate, ServerCaps};
use crate::statement::{Classification, UnsafeReason};
use serde::Serialize;

/// Classification plus the NOT NULL strategy it was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub classification: Classification,
    pub not_null: Option<NotNullStrategy>,
}

impl Decision {
    fn of(classification: Classification) -> Self {
        Self {
            classification,
            not_null: None,
        }
    }
}

/// Classify `op`; see [`decide`]
pub fn classify(
    op: &Operation,
    config: &PlannerConfig,
    caps: &ServerCaps,
    rows: RowEstimate,
) -> Classification {
    decide(op, config, caps, rows).classification
}

/// Classify `op` and, for NOT NULL transitions, pick the strategy.
///
/// `rows` is the row estimate of the operation's table; it is only read when
/// the NOT NULL mode is size based.
pub fn decide(op: &Operation, config: &PlannerConfig, caps: &ServerCaps, rows: RowEstimate) -> Decision {
    use Classification::*;

    match op {
        Operation::CreateTable(_)
        | Operation::DropTable(_)
        | Operation::DropColumn(_)
        | Operation::DropNotNull(_)
        | Operation::DropConstraint(_)
        | Operation::DropIndex(_) => Decision::of(Safe),

        Operation::RenameTable(op) if op.table == op.new_name => Decision::of(Safe),
        Operation::RenameTable(_) => Decision::of(UnsafeUnfixable(UnsafeReason::RenameTable)),

        Operation::SetTablespace(_) => Decision::of(UnsafeUnfixable(UnsafeReason::SetTablespace)),

        Operation::RenameColumn(op) if op.column == op.new_name => Decision::of(Safe),
        Operation::RenameColumn(_) => Decision::of(UnsafeUnfixable(UnsafeReason::RenameColumn)),

        Operation::AlterColumnType(op) => {
            if is_safe_type_change(op) {
                Decision::of(Safe)
            } else {
                Decision::of(UnsafeUnfixable(UnsafeReason::AlterColumnType))
            }
        }

        Operation::AddColumn(op) => {
            let column = &op.column;
            if column.default.is_some() {
                if column.volatile_default || !caps.has_instant_default() {
                    return Decision::of(UnsafeUnfixable(UnsafeReason::AddColumnDefault));
                }
            } else if !column.nullable {
                // Existing rows have nothing to satisfy the constraint with
                return Decision {
                    classification: UnsafeUnfixable(UnsafeReason::AddColumnNotNull),
                    not_null: Some(NotNullStrategy::DirectUnsafe),
                };
            }

            if column.has_inline_objects() {
                Decision::of(UnsafeFixable)
            } else {
                Decision::of(Safe)
            }
        }

        Operation::SetNotNull(_) => {
            let strategy = select_strategy(config.not_null_mode, caps, rows);
            Decision {
                classification: strategy.classification(),
                not_null: Some(strategy),
            }
        }

        Operation::AddConstraint(op) => match op.constraint {
            ConstraintDef::Exclusion { .. } => {
                Decision::of(UnsafeUnfixable(UnsafeReason::AddExclusionConstraint))
            }
            _ => Decision::of(UnsafeFixable),
        },

        Operation::AddIndex(op) if op.index.concurrently => Decision::of(Safe),
        Operation::AddIndex(_) => Decision::of(UnsafeFixable),

        Operation::AlterColumnsTogether(op) if op.add.is_empty() => Decision::of(Safe),
        Operation::AlterColumnsTogether(_) => Decision::of(UnsafeFixable),
    }
}

/// Parsed column type, as far as rewrite rules care
#[derive(Debug, Clone, PartialEq, Eq)]
enum TypeSpec {
    /// `None` is unbounded
    Varchar(Option<u32>),
    Text,
    /// (precision, scale); `None` is unconstrained
    Numeric(Option<(u32, u32)>),
    Varbit(Option<u32>),
    Other(String),
}

fn normalize_type(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace(" (", "(")
        .replace(", ", ",")
}

fn parse_type(raw: &str) -> TypeSpec {
    let normalized = normalize_type(raw);
    let (base, params) = match normalized.split_once('(') {
        Some((base, rest)) => (base.trim().to_string(), Some(rest.trim_end_matches(')').to_string())),
        None => (normalized.clone(), None),
    };
    let numbers: Option<Vec<u32>> = params
        .as_deref()
        .map(|p| p.split(',').map(|n| n.trim().parse::<u32>()).collect::<Result<_, _>>())
        .transpose()
        .ok()
        .flatten();

    match (base.as_str(), numbers.as_deref()) {
        ("varchar" | "character varying", None) if params.is_none() => TypeSpec::Varchar(None),
        ("varchar" | "character varying", Some([length])) => TypeSpec::Varchar(Some(*length)),
        ("text", None) if params.is_none() => TypeSpec::Text,
        ("numeric" | "decimal", None) if params.is_none() => TypeSpec::Numeric(None),
        ("numeric" | "decimal", Some([precision])) => TypeSpec::Numeric(Some((*precision, 0))),
        ("numeric" | "decimal", Some([precision, scale])) => {
            TypeSpec::Numeric(Some((*precision, *scale)))
        }
        ("varbit" | "bit varying", None) if params.is_none() => TypeSpec::Varbit(None),
        ("varbit" | "bit varying", Some([length])) => TypeSpec::Varbit(Some(*length)),
        _ => TypeSpec::Other(normalized),
    }
}

/// Type changes PostgreSQL applies without rewriting the table
fn is_safe_type_change(op: &AlterColumnTypeOp) -> bool {
    use TypeSpec::*;

    let from = parse_type(&op.from_type);
    let to = parse_type(&op.to_type);
    if from == to {
        return true;
    }

    match (from, to) {
        (Varchar(Some(old)), Varchar(Some(new))) => new >= old,
        (Varchar(_), Varchar(None)) | (Varchar(_), Text) => true,
        (Numeric(Some((old_p, old_s))), Numeric(Some((new_p, new_s)))) => {
            new_s == old_s && new_p >= old_p
        }
        (Numeric(_), Numeric(None)) => true,
        (Varbit(Some(old)), Varbit(Some(new))) => new >= old,
        (Varbit(_), Varbit(None)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::not_null::NotNullMode;
    use crate::operation::*;

    fn alter(from: &str, to: &str) -> Operation {
        Operation::AlterColumnType(AlterColumnTypeOp {
            table: "tests_model".to_string(),
            column: "field".to_string(),
            from_type: from.to_string(),
            to_type: to.to_string(),
            using: None,
        })
    }

    fn add_column(column: ColumnDef) -> Operation {
        Operation::AddColumn(AddColumnOp {
            table: "tests_model".to_string(),
            column,
        })
    }

    fn run(op: &Operation) -> Classification {
        classify(op, &PlannerConfig::default(), &ServerCaps::new(120000), RowEstimate::Unknown)
    }

    #[test]
    fn test_type_widening_is_safe() {
        assert_eq!(run(&alter("varchar(40)", "varchar(80)")), Classification::Safe);
        assert_eq!(run(&alter("varchar(40)", "text")), Classification::Safe);
        assert_eq!(run(&alter("character varying(40)", "varchar")), Classification::Safe);
        assert_eq!(run(&alter("numeric(10, 2)", "numeric(20, 2)")), Classification::Safe);
        assert_eq!(run(&alter("numeric(10,2)", "numeric")), Classification::Safe);
        assert_eq!(run(&alter("varbit(8)", "varbit(16)")), Classification::Safe);
        assert_eq!(run(&alter("integer", "INTEGER")), Classification::Safe);
    }

    #[test]
    fn test_type_narrowing_is_unfixable() {
        let unsafe_type = Classification::UnsafeUnfixable(UnsafeReason::AlterColumnType);
        assert_eq!(run(&alter("varchar(40)", "varchar(20)")), unsafe_type);
        assert_eq!(run(&alter("numeric(10, 2)", "numeric(5, 2)")), unsafe_type);
        assert_eq!(run(&alter("numeric(10, 2)", "numeric(10, 3)")), unsafe_type);
        assert_eq!(run(&alter("numeric(10, 2)", "numeric(10, 1)")), unsafe_type);
        assert_eq!(run(&alter("text", "varchar(10)")), unsafe_type);
        assert_eq!(run(&alter("integer", "bigint")), unsafe_type);
    }

    #[test]
    fn test_renames_are_unfixable() {
        let op = Operation::RenameColumn(RenameColumnOp {
            table: "tests_model".to_string(),
            column: "old_field".to_string(),
            new_name: "new_field".to_string(),
        });
        assert_eq!(run(&op), Classification::UnsafeUnfixable(UnsafeReason::RenameColumn));

        let same = Operation::RenameTable(RenameTableOp {
            table: "tests_model".to_string(),
            new_name: "tests_model".to_string(),
        });
        assert_eq!(run(&same), Classification::Safe);
    }

    #[test]
    fn test_add_column_default_depends_on_server() {
        let op = add_column(ColumnDef::new("field", "varchar(40)").with_default("'test'"));
        let config = PlannerConfig::default();

        assert_eq!(
            classify(&op, &config, &ServerCaps::new(100000), RowEstimate::Unknown),
            Classification::UnsafeUnfixable(UnsafeReason::AddColumnDefault)
        );
        assert_eq!(
            classify(&op, &config, &ServerCaps::new(110000), RowEstimate::Unknown),
            Classification::Safe
        );

        let mut volatile = ColumnDef::new("created", "timestamptz").with_default("clock_timestamp()");
        volatile.volatile_default = true;
        assert_eq!(
            run(&add_column(volatile)),
            Classification::UnsafeUnfixable(UnsafeReason::AddColumnDefault)
        );
    }

    #[test]
    fn test_add_column_not_null_without_default() {
        let decision = decide(
            &add_column(ColumnDef::new("field", "varchar(40)").not_null()),
            &PlannerConfig::default(),
            &ServerCaps::new(120000),
            RowEstimate::Unknown,
        );
        assert_eq!(
            decision.classification,
            Classification::UnsafeUnfixable(UnsafeReason::AddColumnNotNull)
        );
        assert_eq!(decision.not_null, Some(NotNullStrategy::DirectUnsafe));

        let with_default = add_column(ColumnDef::new("field", "integer").not_null().with_default("0"));
        assert_eq!(run(&with_default), Classification::Safe);
    }

    #[test]
    fn test_add_column_not_null_ignores_not_null_mode() {
        let op = add_column(ColumnDef::new("field", "varchar(40)").not_null());
        let modes = [
            NotNullMode::Never,
            NotNullMode::AlwaysUseConstraint,
            NotNullMode::SizeThreshold(10),
            NotNullMode::PgAttributeUpdateForSuperuser,
        ];

        for not_null_mode in modes {
            let config = PlannerConfig {
                not_null_mode,
                ..PlannerConfig::default()
            };
            for version in [100000, 110000, 120000] {
                for rows in [RowEstimate::Known(5), RowEstimate::Known(1_000_000), RowEstimate::Unknown] {
                    let decision = decide(&op, &config, &ServerCaps::new(version), rows);
                    assert_eq!(
                        decision.classification,
                        Classification::UnsafeUnfixable(UnsafeReason::AddColumnNotNull),
                        "{:?} on {}",
                        not_null_mode,
                        version
                    );
                    assert_eq!(decision.not_null, Some(NotNullStrategy::DirectUnsafe));
                }
            }
        }
    }

    #[test]
    fn test_add_column_with_inline_objects_is_fixable() {
        assert_eq!(run(&add_column(ColumnDef::new("field", "varchar(40)"))), Classification::Safe);
        assert_eq!(
            run(&add_column(ColumnDef::new("field", "varchar(40)").unique())),
            Classification::UnsafeFixable
        );
        assert_eq!(
            run(&add_column(ColumnDef::new("field_id", "integer").references("tests_model2", "id"))),
            Classification::UnsafeFixable
        );
    }

    #[test]
    fn test_set_not_null_follows_strategy() {
        let op = Operation::SetNotNull(ColumnRef {
            table: "tests_model".to_string(),
            column: "field".to_string(),
        });
        let caps = ServerCaps::new(120000);
        let threshold = PlannerConfig {
            not_null_mode: NotNullMode::SizeThreshold(10),
            ..PlannerConfig::default()
        };

        let small = decide(&op, &threshold, &caps, RowEstimate::Known(5));
        assert_eq!(small.not_null, Some(NotNullStrategy::DirectUnsafe));
        assert_eq!(small.classification, Classification::UnsafeUnfixable(UnsafeReason::SetNotNull));

        let always = decide(&op, &PlannerConfig::default(), &caps, RowEstimate::Known(5));
        assert_eq!(always.not_null, Some(NotNullStrategy::ConstraintAssisted));
        assert_eq!(always.classification, Classification::UnsafeFixable);
    }

    #[test]
    fn test_constraints_and_indexes() {
        let exclusion = Operation::AddConstraint(AddConstraintOp {
            table: "tests_model".to_string(),
            constraint: ConstraintDef::Exclusion {
                name: "field1_excluded".to_string(),
                expression: "USING GIST (\"field1\" WITH =)".to_string(),
            },
        });
        assert_eq!(
            run(&exclusion),
            Classification::UnsafeUnfixable(UnsafeReason::AddExclusionConstraint)
        );

        let mut index = IndexDef::new(["field1"]);
        assert_eq!(
            run(&Operation::AddIndex(AddIndexOp {
                table: "tests_model".to_string(),
                index: index.clone(),
            })),
            Classification::UnsafeFixable
        );
        index.concurrently = true;
        assert_eq!(
            run(&Operation::AddIndex(AddIndexOp {
                table: "tests_model".to_string(),
                index,
            })),
            Classification::Safe
        );
    }

    #[test]
    fn test_drops_are_safe() {
        let op = Operation::DropIndex(DropIndexOp {
            table: "tests_model".to_string(),
            name: Some("tests_model_field_idx".to_string()),
            columns: Vec::new(),
        });
        assert_eq!(run(&op), Classification::Safe);
    }
}
