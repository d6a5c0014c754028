//! Plan executor
//!
//! Sends compiled statements to a live server one at a time, in autocommit
//! mode, so CONCURRENTLY operations never land inside a transaction block.
//! The first failing statement stops the run; nothing is rolled back.
//!
//! A batch of operations is applied one operation at a time: each is planned
//! against a catalog read after the previous one finished executing.

use crate::catalog::CatalogSource;
use crate::compiler::{CompiledOperation, Compiler};
use crate::config::PlannerConfig;
use crate::error::AppError;
use crate::operation::Operation;
use crate::probe::{ServerCaps, TableSizeProbe};
use crate::statement::{Plan, StatementRole};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;
use tokio_postgres::Client;
use tracing::{info, warn};
use uuid::Uuid;

/// Sends one SQL string to the server, outside any explicit transaction
pub trait StatementRunner {
    type Error: std::error::Error + Send + Sync + 'static;

    fn run(&self, sql: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl StatementRunner for Client {
    type Error = tokio_postgres::Error;

    async fn run(&self, sql: &str) -> Result<(), Self::Error> {
        self.batch_execute(sql).await
    }
}

/// Timeout settings the plan has applied and not yet reset
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct OpenTimeouts(usize);

impl OpenTimeouts {
    fn record(&mut self, role: StatementRole) {
        match role {
            StatementRole::TimeoutSet => self.0 += 1,
            StatementRole::TimeoutReset => self.0 = self.0.saturating_sub(1),
            StatementRole::Ddl => {}
        }
    }

    fn is_open(&self) -> bool {
        self.0 > 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub id: Uuid,
    pub success: bool,
    pub executed_statements: Vec<String>,
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
}

/// An operation compiled against the catalog as it stood, then executed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOperation {
    #[serde(flatten)]
    pub compiled: CompiledOperation,
    pub execution: ExecutionReport,
}

pub struct PlanExecutor<'a, R: StatementRunner> {
    runner: &'a R,
}

impl<'a, R: StatementRunner + Sync> PlanExecutor<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }

    /// Execute every statement of `plan` in order
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionReport, AppError> {
        self.run_plan(0, plan).await
    }

    /// Plan and execute `ops` in order, reloading the catalog of each
    /// operation's table right before it is compiled.
    ///
    /// A failure stops the batch; [`AppError::StatementFailed`] carries the
    /// index of the operation that failed, all earlier ones completed.
    pub async fn apply<S, P>(
        &self,
        ops: &[Operation],
        config: &PlannerConfig,
        caps: ServerCaps,
        source: &S,
        probe: &P,
    ) -> Result<Vec<AppliedOperation>, AppError>
    where
        S: CatalogSource + Sync,
        P: TableSizeProbe + Sync,
    {
        let mut applied = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            match self.apply_one(index, op, config, caps, source, probe).await {
                Ok(done) => applied.push(done),
                Err(e) => {
                    warn!("Stopping after {} of {} operations: {}", index, ops.len(), e);
                    return Err(e);
                }
            }
        }
        Ok(applied)
    }

    async fn apply_one<S, P>(
        &self,
        index: usize,
        op: &Operation,
        config: &PlannerConfig,
        caps: ServerCaps,
        source: &S,
        probe: &P,
    ) -> Result<AppliedOperation, AppError>
    where
        S: CatalogSource + Sync,
        P: TableSizeProbe + Sync,
    {
        let catalog = source.load_catalog(&[op.table().to_string()]).await?;
        let compiled = Compiler::new(config, caps, &catalog, probe).compile(op).await?;
        let execution = self.run_plan(index, &compiled.statements).await?;

        info!("Applied operation {}: {} on {}", index, compiled.operation, compiled.table);
        Ok(AppliedOperation { compiled, execution })
    }

    async fn run_plan(&self, operation: usize, plan: &Plan) -> Result<ExecutionReport, AppError> {
        let started = Instant::now();
        let executed_at = Utc::now();
        let mut executed_statements = Vec::with_capacity(plan.len());
        let mut open = OpenTimeouts::default();

        for (position, statement) in plan.iter().enumerate() {
            info!("Executing statement {}: {}", position, statement.sql);
            if let Err(source) = self.runner.run(&statement.sql).await {
                if open.is_open() {
                    self.restore_session().await;
                }
                return Err(AppError::StatementFailed {
                    operation,
                    position,
                    sql: statement.sql.clone(),
                    source: Box::new(source),
                });
            }
            open.record(statement.role);
            executed_statements.push(statement.sql.clone());
        }

        Ok(ExecutionReport {
            id: Uuid::new_v4(),
            success: true,
            executed_statements,
            duration_ms: started.elapsed().as_millis() as u64,
            executed_at,
        })
    }

    /// Drop timeouts left behind by a region that never reached its resets
    async fn restore_session(&self) {
        if let Err(e) = self
            .runner
            .run("RESET statement_timeout; RESET lock_timeout;")
            .await
        {
            warn!("Could not reset session timeouts: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, ColumnInfo, IndexInfo, TableCatalog};
    use crate::operation::{AddIndexOp, DropIndexOp, IndexDef, RenameColumnOp};
    use crate::probe::StaticSizeProbe;
    use crate::statement::Statement;
    use crate::timeout;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::sync::Mutex;

    const RESET: &str = "RESET statement_timeout; RESET lock_timeout;";

    /// Records accepted statements and rejects the first one equal to `reject`
    #[derive(Default)]
    struct FakeServer {
        accepted: Mutex<Vec<String>>,
        reject: Option<String>,
    }

    impl FakeServer {
        fn rejecting(sql: &str) -> Self {
            Self {
                accepted: Mutex::new(Vec::new()),
                reject: Some(sql.to_string()),
            }
        }

        fn accepted(&self) -> Vec<String> {
            self.accepted.lock().unwrap().clone()
        }
    }

    impl StatementRunner for FakeServer {
        type Error = io::Error;

        async fn run(&self, sql: &str) -> Result<(), io::Error> {
            if self.reject.as_deref() == Some(sql) {
                return Err(io::Error::other("canceling statement due to lock timeout"));
            }
            self.accepted.lock().unwrap().push(sql.to_string());
            Ok(())
        }
    }

    /// Table `t(a)` plus every index the server has built so far
    impl CatalogSource for FakeServer {
        async fn load_catalog(&self, tables: &[String]) -> Result<CatalogSnapshot, AppError> {
            assert_eq!(tables.to_vec(), vec!["t".to_string()]);
            let mut entry = TableCatalog::default().with_column(ColumnInfo {
                name: "a".to_string(),
                data_type: "integer".to_string(),
                not_null: false,
            });
            for sql in self.accepted() {
                let dropped = sql.starts_with("DROP INDEX");
                if let Some(name) = sql.split('"').nth(1).filter(|_| sql.starts_with("CREATE INDEX")) {
                    entry = entry.with_index(IndexInfo {
                        name: name.to_string(),
                        columns: vec!["a".to_string()],
                        opclasses: Vec::new(),
                        unique: false,
                        primary: false,
                        valid: true,
                        partitioned: false,
                        constraint: None,
                    });
                }
                if dropped {
                    entry.indexes.clear();
                }
            }
            Ok(CatalogSnapshot::new().with_table("t", entry))
        }
    }

    fn timeouts() -> PlannerConfig {
        PlannerConfig {
            lock_timeout_ms: Some(2000),
            statement_timeout_ms: Some(30000),
            ..PlannerConfig::default()
        }
    }

    /// SET, SET, ADD CHECK, reset, reset, VALIDATE, SET, SET, SET NOT NULL, reset, reset
    fn not_null_plan() -> Plan {
        timeout::wrap(
            Plan::from(vec![
                Statement::wrapped("ADD CHECK;"),
                Statement::flexible("VALIDATE;"),
                Statement::wrapped("SET NOT NULL;"),
            ]),
            &timeouts(),
        )
    }

    fn execute(server: &FakeServer, plan: &Plan) -> Result<ExecutionReport, AppError> {
        tokio_test::block_on(PlanExecutor::new(server).execute(plan))
    }

    fn failed_at(result: Result<ExecutionReport, AppError>) -> (usize, usize) {
        match result {
            Err(AppError::StatementFailed {
                operation, position, ..
            }) => (operation, position),
            other => panic!("expected StatementFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_executes_whole_plan() {
        let server = FakeServer::default();
        let plan = not_null_plan();

        let report = execute(&server, &plan).unwrap();
        assert!(report.success);
        assert_eq!(report.executed_statements, plan.sql());
        assert_eq!(server.accepted(), plan.sql());
    }

    #[test]
    fn test_failure_inside_region_resets_session() {
        let server = FakeServer::rejecting("SET NOT NULL;");
        let plan = not_null_plan();

        assert_eq!(failed_at(execute(&server, &plan)), (0, 8));
        let accepted = server.accepted();
        assert_eq!(accepted.len(), 9);
        assert_eq!(accepted.last().map(String::as_str), Some(RESET));
        assert!(!accepted.iter().any(|sql| sql == "SET NOT NULL;"));
    }

    #[test]
    fn test_failure_between_regions_sends_no_reset() {
        let server = FakeServer::rejecting("VALIDATE;");

        assert_eq!(failed_at(execute(&server, &not_null_plan())), (0, 5));
        let accepted = server.accepted();
        assert_eq!(accepted.len(), 5);
        assert_eq!(accepted.last().map(String::as_str), Some("SET lock_timeout TO '0ms';"));
    }

    #[test]
    fn test_failure_on_second_set_resets_the_first() {
        let server = FakeServer::rejecting("SET lock_timeout TO '2000ms';");

        assert_eq!(failed_at(execute(&server, &not_null_plan())), (0, 1));
        assert_eq!(
            server.accepted(),
            vec!["SET statement_timeout TO '30000ms';".to_string(), RESET.to_string()]
        );
    }

    #[test]
    fn test_failure_on_second_reset_still_resets() {
        let server = FakeServer::rejecting("SET lock_timeout TO '0ms';");

        assert_eq!(failed_at(execute(&server, &not_null_plan())), (0, 4));
        assert_eq!(server.accepted().last().map(String::as_str), Some(RESET));
    }

    #[test]
    fn test_failure_before_any_set_sends_no_reset() {
        let server = FakeServer::rejecting("SET statement_timeout TO '30000ms';");

        assert_eq!(failed_at(execute(&server, &not_null_plan())), (0, 0));
        assert!(server.accepted().is_empty());
    }

    #[test]
    fn test_open_timeouts_tracking() {
        let mut open = OpenTimeouts::default();
        assert!(!open.is_open());
        open.record(StatementRole::TimeoutSet);
        open.record(StatementRole::TimeoutSet);
        open.record(StatementRole::TimeoutReset);
        assert!(open.is_open());
        open.record(StatementRole::Ddl);
        open.record(StatementRole::TimeoutReset);
        assert!(!open.is_open());
        open.record(StatementRole::TimeoutReset);
        assert_eq!(open, OpenTimeouts(0));
    }

    fn add_index() -> Operation {
        Operation::AddIndex(AddIndexOp {
            table: "t".to_string(),
            index: IndexDef::new(["a"]),
        })
    }

    fn apply(server: &FakeServer, ops: &[Operation]) -> Result<Vec<AppliedOperation>, AppError> {
        let config = PlannerConfig::default();
        let probe = StaticSizeProbe::default();
        tokio_test::block_on(PlanExecutor::new(server).apply(
            ops,
            &config,
            ServerCaps::new(120000),
            server,
            &probe,
        ))
    }

    #[test]
    fn test_later_operation_sees_objects_built_by_earlier_one() {
        let server = FakeServer::default();
        let drop = Operation::DropIndex(DropIndexOp {
            table: "t".to_string(),
            name: None,
            columns: vec!["a".to_string()],
        });

        let applied = apply(&server, &[add_index(), drop]).unwrap();
        assert_eq!(applied.len(), 2);

        let create = applied[0].compiled.statements.sql()[0].to_string();
        assert!(create.starts_with("CREATE INDEX CONCURRENTLY"));
        let name = create.split('"').nth(1).unwrap();
        assert_eq!(
            applied[1].compiled.statements.sql(),
            vec![format!(r#"DROP INDEX CONCURRENTLY IF EXISTS "{}";"#, name)]
        );
        assert_eq!(
            server.accepted(),
            vec![create.clone(), format!(r#"DROP INDEX CONCURRENTLY IF EXISTS "{}";"#, name)]
        );
    }

    #[test]
    fn test_failed_operation_index_is_reported() {
        let rename = Operation::RenameColumn(RenameColumnOp {
            table: "t".to_string(),
            column: "a".to_string(),
            new_name: "b".to_string(),
        });
        let server = FakeServer::rejecting(r#"ALTER TABLE "t" RENAME COLUMN "a" TO "b";"#);

        match apply(&server, &[add_index(), rename]) {
            Err(AppError::StatementFailed {
                operation, position, ..
            }) => assert_eq!((operation, position), (1, 0)),
            other => panic!("expected StatementFailed, got {:?}", other),
        }
        assert_eq!(server.accepted().len(), 1);
    }
}
