//! Unsafe operation policy
//!
//! Gates unfixable operations. Fixable and safe operations always proceed
//! silently; the policy never changes the SQL that is produced.

use crate::config::PlannerConfig;
use crate::statement::{Classification, UnsafeReason};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "reason")]
pub enum Action {
    Proceed,
    /// Run the naive statements verbatim and report the reason
    ProceedWithWarning(UnsafeReason),
    /// Stop before any statement is sent
    Abort(UnsafeReason),
}

impl Action {
    pub fn reason(&self) -> Option<UnsafeReason> {
        match self {
            Action::Proceed => None,
            Action::ProceedWithWarning(reason) | Action::Abort(reason) => Some(*reason),
        }
    }
}

pub fn enforce(classification: &Classification, config: &PlannerConfig) -> Action {
    match classification {
        Classification::Safe | Classification::UnsafeFixable => Action::Proceed,
        Classification::UnsafeUnfixable(reason) if config.raise_for_unsafe => Action::Abort(*reason),
        Classification::UnsafeUnfixable(reason) => Action::ProceedWithWarning(*reason),
    }
}
