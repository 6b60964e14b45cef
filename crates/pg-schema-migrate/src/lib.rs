//! # pg-schema-migrate
//!
//! Schema-driven PostgreSQL to PostgreSQL table migration library.
//!
//! Tables are moved from a legacy source schema into a target schema with:
//!
//! - **Column reconciliation** by name, so target-only columns are left to
//!   their defaults and source-only columns are dropped with a warning
//! - **Landing tables** synthesized from source metadata in reset mode
//! - **Trigger suspension** around each load, restoring the prior state
//! - **Per-row failure isolation**: a rejected row is logged and counted
//! - **Natural-key deduplication** that rewrites repeated keys
//! - **Ranked, parallel execution** with cancellation and a run deadline
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_schema_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pg_schema_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Inserted {} rows", report.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constraints;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod schema;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, LoadMode, MigrationConfig, TableConfig};
pub use constraints::{ConstraintManager, TriggerSnapshot};
pub use crate::core::{ColumnSpec, Row, SqlValue, TableDescriptor};
pub use drivers::PgDatabase;
pub use error::{MigrateError, Result};
pub use orchestrator::{
    HealthCheckResult, MigrationReport, Orchestrator, RunStatus, SkipReason, TableOutcome,
    TablePlan, TableStatus,
};
pub use schema::{reconcile, synthesize, ReconciledColumnSet};
pub use transfer::{DuplicateKeyResolver, RowLoader};
