//! Dry-run planning and connectivity checks.

use std::time::Instant;

use serde::Serialize;

use super::report::SkipReason;
use super::table::TableJob;
use crate::config::LoadMode;
use crate::core::schema::ColumnSpec;
use crate::core::traits::{Database, SourceDatabase, TargetDatabase};
use crate::error::Result;
use crate::schema::{introspect, landing_column, reconcile, synthesize, ColumnSummary};

/// What a run would do to one table. Produced without touching the target.
#[derive(Debug, Clone, Serialize)]
pub struct TablePlan {
    pub table: String,
    pub target_table: String,
    pub mode: LoadMode,
    pub rank: i32,
    pub source_exists: bool,
    pub target_exists: bool,
    pub columns: ColumnSummary,

    /// Natural key that would be deduplicated, if it is migrated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,

    /// Landing table DDL in reset mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

pub(crate) async fn plan_table(
    source: &dyn SourceDatabase,
    target: &dyn TargetDatabase,
    job: &TableJob,
) -> Result<TablePlan> {
    let mut plan = TablePlan {
        table: job.source.to_string(),
        target_table: job.target.to_string(),
        mode: job.config.mode,
        rank: job.config.rank,
        source_exists: source.table_exists(&job.source).await?,
        target_exists: target.table_exists(&job.target).await?,
        columns: ColumnSummary::default(),
        natural_key: None,
        ddl: None,
        skip_reason: None,
    };

    if !plan.source_exists {
        plan.skip_reason = Some(SkipReason::TableAbsent);
        return Ok(plan);
    }

    let source_columns = introspect(source, &job.source).await?;
    let exclude = &job.config.exclude_columns;
    let target_columns: Vec<ColumnSpec> = match job.config.mode {
        LoadMode::Reset => source_columns.iter().map(landing_column).collect(),
        LoadMode::Truncate | LoadMode::Append => introspect(target, &job.target).await?,
    };

    let columns = reconcile(&source_columns, &target_columns, exclude);
    plan.columns = columns.summary();
    if columns.is_empty() {
        plan.skip_reason = Some(SkipReason::SchemaConflict);
        return Ok(plan);
    }

    if job.config.mode == LoadMode::Reset {
        plan.ddl = Some(synthesize(&job.target, &source_columns, exclude)?.sql);
    }
    plan.natural_key = job
        .config
        .natural_key
        .as_ref()
        .filter(|key| columns.contains(&key.column))
        .map(|key| key.column.clone());

    Ok(plan)
}

/// Connectivity of one database.
#[derive(Debug, Clone, Serialize)]
pub struct SideHealth {
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SideHealth {
    pub(crate) async fn probe<D: Database + ?Sized>(db: &D) -> Self {
        let started = Instant::now();
        let result = db.ping().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => Self {
                connected: true,
                latency_ms,
                error: None,
            },
            Err(e) => Self {
                connected: false,
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Result of probing both databases.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source: SideHealth,
    pub target: SideHealth,
}

impl HealthCheckResult {
    pub fn new(source: SideHealth, target: SideHealth) -> Self {
        Self {
            healthy: source.connected && target.connected,
            source,
            target,
        }
    }
}
