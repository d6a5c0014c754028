//! SchemaFlow ZDM - zero-downtime PostgreSQL schema changes
//!
//! Turns one abstract schema operation at a time into the SQL that applies it
//! without long exclusive locks or table rewrites:
//!
//! - `classifier`: decides whether an operation is safe, fixable or unfixable
//! - `not_null`: picks how a column becomes NOT NULL
//! - `planner`: rewrites fixable operations into low-lock statement sequences
//! - `timeout`: wraps statements with lock/statement timeout settings
//! - `policy`: warns about or aborts unfixable operations
//! - `compiler`: runs the whole pipeline for one operation
//! - `executor`: sends compiled statements to a live server

pub mod catalog;
pub mod classifier;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod naming;
pub mod not_null;
pub mod operation;
pub mod planner;
pub mod policy;
pub mod probe;
pub mod statement;
pub mod timeout;

pub use catalog::{Catalog, CatalogSnapshot};
pub use classifier::{classify, decide, Decision};
pub use compiler::{CompiledOperation, Compiler};
pub use config::PlannerConfig;
pub use error::AppError;
pub use not_null::{NotNullMode, NotNullStrategy};
pub use operation::Operation;
pub use policy::Action;
pub use probe::{RowEstimate, ServerCaps, TableSizeProbe};
pub use statement::{Classification, Plan, Statement, TimeoutClass, UnsafeReason};
