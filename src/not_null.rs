//! NOT NULL strategy selection
//!
//! Picks how an existing column becomes NOT NULL. A plain `SET NOT NULL`
//! scans the whole table under an ACCESS EXCLUSIVE lock; the alternatives
//! prove the rule with a CHECK constraint that is validated out-of-band.

use crate::probe::{RowEstimate, ServerCaps};
use crate::statement::{Classification, UnsafeReason};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Configured NOT NULL policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotNullMode {
    /// Always use the direct statement
    Never,
    AlwaysUseConstraint,
    /// Direct statement for tables with at most this many rows
    SizeThreshold(u64),
    /// Write `pg_attribute.attnotnull` directly on pre-12 servers
    PgAttributeUpdateForSuperuser,
}

impl NotNullMode {
    /// Whether selection depends on the table's row estimate
    pub fn needs_row_estimate(&self) -> bool {
        matches!(self, NotNullMode::SizeThreshold(_))
    }
}

impl FromStr for NotNullMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_lowercase();
        match value.as_str() {
            "true" | "always" | "always_use_constraint" => Ok(NotNullMode::AlwaysUseConstraint),
            "false" | "never" => Ok(NotNullMode::Never),
            "use_pg_attribute_update_for_superuser" | "pg_attribute_update_for_superuser" => {
                Ok(NotNullMode::PgAttributeUpdateForSuperuser)
            }
            other => other
                .parse::<u64>()
                .map(NotNullMode::SizeThreshold)
                .map_err(|_| format!("unknown NOT NULL mode: {}", s)),
        }
    }
}

/// How the column becomes NOT NULL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotNullStrategy {
    /// Plain `ALTER COLUMN ... SET NOT NULL`
    DirectUnsafe,
    /// CHECK NOT VALID, VALIDATE, then SET NOT NULL
    ConstraintAssisted,
    /// CHECK NOT VALID, VALIDATE, then a catalog flag update
    PgAttributeHack,
}

impl NotNullStrategy {
    pub fn classification(&self) -> Classification {
        match self {
            NotNullStrategy::DirectUnsafe => Classification::UnsafeUnfixable(UnsafeReason::SetNotNull),
            NotNullStrategy::ConstraintAssisted | NotNullStrategy::PgAttributeHack => {
                Classification::UnsafeFixable
            }
        }
    }
}

/// Choose the strategy for making an existing column NOT NULL.
///
/// `rows` only matters for [`NotNullMode::SizeThreshold`]; an unknown estimate
/// is treated like a small table.
pub fn select_strategy(mode: NotNullMode, caps: &ServerCaps, rows: RowEstimate) -> NotNullStrategy {
    match mode {
        NotNullMode::Never => NotNullStrategy::DirectUnsafe,
        NotNullMode::PgAttributeUpdateForSuperuser if !caps.set_not_null_uses_check() => {
            NotNullStrategy::PgAttributeHack
        }
        NotNullMode::AlwaysUseConstraint => NotNullStrategy::ConstraintAssisted,
        NotNullMode::SizeThreshold(threshold) => match rows {
            RowEstimate::Known(count) if count > threshold => NotNullStrategy::ConstraintAssisted,
            _ => NotNullStrategy::DirectUnsafe,
        },
        NotNullMode::PgAttributeUpdateForSuperuser => NotNullStrategy::ConstraintAssisted,
    }
}
