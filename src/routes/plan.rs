//! Planning and execution route handlers
//!
//! Offline requests carry their own server capabilities, catalog and row
//! estimates. Live requests (and every execution) read them from the target
//! database configured through DATABASE_URL.

use crate::models::{ExecuteResponse, PlanRequest, PlanResponse, SuccessResponse};
use crate::state::SharedState;
use axum::{extract::State, Json};
use schemaflow_zdm::catalog::CatalogSnapshot;
use schemaflow_zdm::compiler::{CompiledOperation, Compiler};
use schemaflow_zdm::config::PlannerConfig;
use schemaflow_zdm::error::{validation_error, ApiResult, AppError};
use schemaflow_zdm::executor::PlanExecutor;
use schemaflow_zdm::probe::{session_defaults, PostgresSizeProbe, ServerCaps, StaticSizeProbe};
use tokio_postgres::Client;
use tracing::{debug, info};
use validator::Validate;

/// Compile operations into zero-downtime statement plans
pub async fn plan_operations(
    State(state): State<SharedState>,
    Json(payload): Json<PlanRequest>,
) -> ApiResult<Json<SuccessResponse<PlanResponse>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    let config = payload.config.clone().unwrap_or_else(|| state.planner.clone());

    let (server, compiled) = if payload.live {
        let client = state.pool()?.get().await?;
        compile_live(&client, &payload, config).await?
    } else {
        compile_offline(&payload, &config).await?
    };

    info!(
        "Planned {} operations ({})",
        compiled.len(),
        if payload.live { "live" } else { "offline" }
    );
    let response = PlanResponse::new(server, compiled);
    Ok(Json(SuccessResponse::with_data(
        format!("Planned {} operations.", response.operations.len()),
        response,
    )))
}

/// Plan and run operations against the target database, one at a time.
///
/// Each operation is compiled against a catalog read after the previous one
/// finished, so later operations see what earlier ones built or dropped.
/// A request-supplied catalog is ignored here.
pub async fn execute_operations(
    State(state): State<SharedState>,
    Json(payload): Json<PlanRequest>,
) -> ApiResult<Json<SuccessResponse<ExecuteResponse>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    let mut config = payload.config.clone().unwrap_or_else(|| state.planner.clone());

    let conn = state.pool()?.get().await?;
    let client: &Client = &conn;
    let caps = ServerCaps::probe(client).await?;
    if payload.config.is_none() {
        config.session_defaults = session_defaults(client).await?;
    }

    let probe = PostgresSizeProbe::new(client);
    let applied = PlanExecutor::new(client)
        .apply(&payload.operations, &config, caps, client, &probe)
        .await?;

    info!("Executed {} operations", applied.len());
    let (compiled, executions): (Vec<_>, Vec<_>) = applied
        .into_iter()
        .map(|a| (a.compiled, a.execution))
        .unzip();
    let response = ExecuteResponse {
        plan: PlanResponse::new(config.server_caps(caps), compiled),
        executions,
    };
    Ok(Json(SuccessResponse::with_data(
        format!("Executed {} operations.", response.executions.len()),
        response,
    )))
}

async fn compile_offline(
    payload: &PlanRequest,
    config: &PlannerConfig,
) -> Result<(ServerCaps, Vec<CompiledOperation>), AppError> {
    let catalog = payload.catalog.clone().unwrap_or_default();
    let probe = StaticSizeProbe::new(payload.row_estimates.clone());
    let compiler = Compiler::new(config, payload.server.unwrap_or_default(), &catalog, &probe);

    let compiled = compiler.compile_all(&payload.operations).await?;
    Ok((*compiler.caps(), compiled))
}

async fn compile_live(
    client: &Client,
    payload: &PlanRequest,
    mut config: PlannerConfig,
) -> Result<(ServerCaps, Vec<CompiledOperation>), AppError> {
    let caps = ServerCaps::probe(client).await?;
    if payload.config.is_none() {
        config.session_defaults = session_defaults(client).await?;
    }

    let catalog = match &payload.catalog {
        Some(catalog) => catalog.clone(),
        None => CatalogSnapshot::load(client, &payload.tables()).await?,
    };
    debug!("Loaded catalog for {} tables", payload.tables().len());

    let probe = PostgresSizeProbe::new(client);
    let compiler = Compiler::new(&config, caps, &catalog, &probe);
    let compiled = compiler.compile_all(&payload.operations).await?;
    Ok((*compiler.caps(), compiled))
}
