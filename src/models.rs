//! Request and response DTOs

use once_cell::sync::Lazy;
use regex::Regex;
use schemaflow_zdm::catalog::CatalogSnapshot;
use schemaflow_zdm::compiler::CompiledOperation;
use schemaflow_zdm::config::PlannerConfig;
use schemaflow_zdm::executor::ExecutionReport;
use schemaflow_zdm::naming::MAX_NAME_LENGTH;
use schemaflow_zdm::operation::Operation;
use schemaflow_zdm::probe::ServerCaps;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::{Validate, ValidationError};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]*$").expect("identifier pattern compiles"));

/// Generic success response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Operations to plan (or execute) in order
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    #[validate(length(min = 1, message = "At least one operation is required"))]
    #[validate(custom(function = "validate_operations"))]
    pub operations: Vec<Operation>,
    /// Replaces the server's planner settings for this request
    #[serde(default)]
    pub config: Option<PlannerConfig>,
    /// Offline server capabilities; probed when planning live
    #[serde(default)]
    pub server: Option<ServerCaps>,
    /// Offline catalog; introspected when planning live
    #[serde(default)]
    pub catalog: Option<CatalogSnapshot>,
    /// Offline row estimates per table
    #[serde(default)]
    pub row_estimates: HashMap<String, u64>,
    /// Plan against the configured target database
    #[serde(default)]
    pub live: bool,
}

impl PlanRequest {
    /// Distinct tables the operations touch, in first-seen order
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for op in &self.operations {
            if !tables.iter().any(|t| t == op.table()) {
                tables.push(op.table().to_string());
            }
        }
        tables
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub server: ServerCaps,
    pub operations: Vec<CompiledOperation>,
    pub warnings: Vec<String>,
}

impl PlanResponse {
    pub fn new(server: ServerCaps, operations: Vec<CompiledOperation>) -> Self {
        let warnings = operations.iter().filter_map(|c| c.warning()).collect();
        Self {
            server,
            operations,
            warnings,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    #[serde(flatten)]
    pub plan: PlanResponse,
    pub executions: Vec<ExecutionReport>,
}

/// Every identifier must be a plain PostgreSQL name
#[allow(clippy::ptr_arg)]
fn validate_operations(operations: &Vec<Operation>) -> Result<(), ValidationError> {
    for op in operations {
        for name in op.identifiers() {
            if name.chars().count() > MAX_NAME_LENGTH || !IDENTIFIER.is_match(name) {
                let mut err = ValidationError::new("invalid_identifier");
                err.message = Some(
                    format!(
                        "Invalid identifier '{}' in {}. Must start with a letter or underscore, contain only letters, digits, underscores or dollar signs, and be at most 63 characters.",
                        name,
                        op.kind_name()
                    )
                    .into(),
                );
                return Err(err);
            }
        }
    }
    Ok(())
}
