//! Timeout policy
//!
//! Brackets runs of statements with `SET statement_timeout` / `SET lock_timeout`
//! and the matching resets. Consecutive statements that need the same
//! settings share one region; statements that must not be bounded are left
//! between regions.

use crate::config::PlannerConfig;
use crate::statement::{Plan, Statement, StatementRole, TimeoutClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    /// Lock and statement timeout
    Standard,
    /// Statement timeout only
    Flexible,
}

/// FlexibleWrapped statements only get a region in flexible mode; otherwise
/// VALIDATE and index builds run unbounded between the standard regions.
fn region_of(statement: &Statement, config: &PlannerConfig) -> Option<Region> {
    if !statement.is_ddl() {
        return None;
    }
    match statement.timeout {
        TimeoutClass::Wrapped
            if config.statement_timeout_ms.is_some() || config.lock_timeout_ms.is_some() =>
        {
            Some(Region::Standard)
        }
        TimeoutClass::FlexibleWrapped if config.flexible_statement_timeout => Some(Region::Flexible),
        _ => None,
    }
}

fn set(variable: &str, value: &str, role: StatementRole) -> Statement {
    Statement::session(format!("SET {} TO '{}';", variable, value), role)
}

fn millis(value: u64) -> String {
    format!("{}ms", value)
}

fn open(region: Region, config: &PlannerConfig, plan: &mut Plan) {
    match region {
        Region::Standard => {
            if let Some(ms) = config.statement_timeout_ms {
                plan.push(set("statement_timeout", &millis(ms), StatementRole::TimeoutSet));
            }
            if let Some(ms) = config.lock_timeout_ms {
                plan.push(set("lock_timeout", &millis(ms), StatementRole::TimeoutSet));
            }
        }
        Region::Flexible => {
            plan.push(set(
                "statement_timeout",
                &millis(config.flexible_statement_timeout_ms),
                StatementRole::TimeoutSet,
            ));
        }
    }
}

fn close(region: Region, config: &PlannerConfig, plan: &mut Plan) {
    let defaults = &config.session_defaults;
    match region {
        Region::Standard => {
            if config.statement_timeout_ms.is_some() {
                plan.push(set("statement_timeout", &defaults.statement_timeout, StatementRole::TimeoutReset));
            }
            if config.lock_timeout_ms.is_some() {
                plan.push(set("lock_timeout", &defaults.lock_timeout, StatementRole::TimeoutReset));
            }
        }
        Region::Flexible => {
            plan.push(set("statement_timeout", &defaults.statement_timeout, StatementRole::TimeoutReset));
        }
    }
}

/// Insert timeout settings around the statements of `plan`
pub fn wrap(plan: Plan, config: &PlannerConfig) -> Plan {
    let mut wrapped = Plan::new();
    let mut current: Option<Region> = None;

    for statement in plan {
        let region = region_of(&statement, config);
        if region != current {
            if let Some(previous) = current {
                close(previous, config, &mut wrapped);
            }
            if let Some(next) = region {
                open(next, config, &mut wrapped);
            }
            current = region;
        }
        wrapped.push(statement);
    }

    if let Some(last) = current {
        close(last, config, &mut wrapped);
    }
    wrapped
}
