//! Operation compiler
//!
//! Runs one operation through classification, policy, planning and timeout
//! wrapping, and returns the statements to execute.

use crate::catalog::Catalog;
use crate::classifier::decide;
use crate::config::PlannerConfig;
use crate::error::AppError;
use crate::not_null::NotNullStrategy;
use crate::operation::Operation;
use crate::planner;
use crate::policy::{enforce, Action};
use crate::probe::{RowEstimate, ServerCaps, TableSizeProbe};
use crate::statement::{Classification, Plan};
use crate::timeout;
use serde::Serialize;
use tracing::{debug, warn};

/// Result of compiling one operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledOperation {
    pub operation: &'static str,
    pub table: String,
    pub classification: Classification,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<NotNullStrategy>,
    /// What a lock-unaware migrator would have sent
    pub base_sql: Vec<String>,
    /// Statements to execute, in order, timeouts included
    pub statements: Plan,
}

impl CompiledOperation {
    pub fn warning(&self) -> Option<String> {
        match self.action {
            Action::ProceedWithWarning(reason) => Some(reason.message()),
            _ => None,
        }
    }
}

/// Compiles operations against one server and catalog
pub struct Compiler<'a, C: Catalog + ?Sized, P: TableSizeProbe> {
    config: &'a PlannerConfig,
    caps: ServerCaps,
    catalog: &'a C,
    probe: &'a P,
}

impl<'a, C: Catalog + ?Sized, P: TableSizeProbe> Compiler<'a, C, P> {
    pub fn new(config: &'a PlannerConfig, caps: ServerCaps, catalog: &'a C, probe: &'a P) -> Self {
        Self {
            config,
            caps: config.server_caps(caps),
            catalog,
            probe,
        }
    }

    pub fn caps(&self) -> &ServerCaps {
        &self.caps
    }

    /// Compile a single operation.
    ///
    /// Unfixable operations under `raise_for_unsafe` fail with
    /// [`AppError::UnsafeOperation`]; otherwise they compile to the naive
    /// statements unchanged.
    pub async fn compile(&self, op: &Operation) -> Result<CompiledOperation, AppError> {
        let rows = match op {
            Operation::SetNotNull(column) if self.config.not_null_mode.needs_row_estimate() => {
                self.probe.estimate_rows(&column.table).await?
            }
            _ => RowEstimate::Unknown,
        };

        let decision = decide(op, self.config, &self.caps, rows);
        let base = planner::naive(op, &self.caps, self.catalog)?;
        let base_sql: Vec<String> = base.iter().map(|s| s.sql.clone()).collect();

        let action = enforce(&decision.classification, self.config);
        let plan = match action {
            Action::Abort(reason) => {
                warn!(code = reason.code(), "Refusing {} on {}: {}", op.kind_name(), op.table(), reason);
                return Err(AppError::UnsafeOperation {
                    reason,
                    statements: base_sql,
                });
            }
            Action::ProceedWithWarning(reason) => {
                warn!(code = reason.code(), "{} on {}: {}", op.kind_name(), op.table(), reason);
                base
            }
            Action::Proceed => planner::plan(op, &decision, &self.caps, self.catalog)?,
        };

        let statements = timeout::wrap(plan, self.config);
        debug!(
            "Compiled {} on {} ({:?}) into {} statements",
            op.kind_name(),
            op.table(),
            decision.classification,
            statements.len()
        );

        Ok(CompiledOperation {
            operation: op.kind_name(),
            table: op.table().to_string(),
            classification: decision.classification,
            action,
            strategy: decision.not_null,
            base_sql,
            statements,
        })
    }

    /// Compile operations in order, stopping at the first failure.
    ///
    /// Every operation sees the same catalog, so an operation that depends on
    /// an object an earlier one creates fails here; use
    /// [`PlanExecutor::apply`](crate::executor::PlanExecutor::apply) to run them.
    pub async fn compile_all(&self, ops: &[Operation]) -> Result<Vec<CompiledOperation>, AppError> {
        let mut compiled = Vec::with_capacity(ops.len());
        for op in ops {
            compiled.push(self.compile(op).await?);
        }
        Ok(compiled)
    }
}
