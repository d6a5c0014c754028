//! Application state management
//!
//! Contains shared state accessible across all handlers.

use deadpool_postgres::Pool;
use schemaflow_zdm::config::PlannerConfig;
use schemaflow_zdm::error::AppError;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Target database pool; `None` when the service only plans offline
    pub db_pool: Option<Pool>,

    /// Planner settings loaded from the environment, used unless a request overrides them
    pub planner: PlannerConfig,
}

impl AppState {
    pub fn new(db_pool: Option<Pool>, planner: PlannerConfig) -> Self {
        Self { db_pool, planner }
    }

    /// Pool of the target database
    pub fn pool(&self) -> Result<&Pool, AppError> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::NotConnected(
                "No target database configured. Set DATABASE_URL to plan live or execute.".to_string(),
            )
        })
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
