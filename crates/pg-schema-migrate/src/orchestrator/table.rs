//! One table's walk through the migration states.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::report::{SkipReason, TableOutcome, TableStatus};
use crate::config::{LoadMode, TableConfig};
use crate::constraints::ConstraintManager;
use crate::core::schema::{ColumnSpec, TableDescriptor};
use crate::core::traits::{SourceDatabase, TargetDatabase};
use crate::error::{MigrateError, Result};
use crate::schema::{introspect, landing_column, reconcile, synthesize, ReconciledColumnSet};
use crate::transfer::{InsertStatement, LoadStats, RowLoader};

/// A configured table with its resolved source and target names.
#[derive(Debug, Clone)]
pub struct TableJob {
    pub config: TableConfig,
    pub source: TableDescriptor,
    pub target: TableDescriptor,
}

impl TableJob {
    pub fn new(config: TableConfig, source_schema: &str, target_schema: &str) -> Self {
        let source = TableDescriptor::new(source_schema, &config.name);
        let target = TableDescriptor::new(target_schema, config.target_table());
        Self {
            config,
            source,
            target,
        }
    }
}

/// Runs table jobs against a shared pair of databases.
#[derive(Clone)]
pub(crate) struct TableRunner {
    pub source: Arc<dyn SourceDatabase>,
    pub target: Arc<dyn TargetDatabase>,
    pub read_ahead_rows: usize,
    pub deadline_hit: Arc<AtomicBool>,
}

/// What a step decided when it could not carry on.
enum Stop {
    Skip(SkipReason),
    Fail(MigrateError),
}

impl From<MigrateError> for Stop {
    fn from(e: MigrateError) -> Self {
        Stop::Fail(e)
    }
}

impl TableRunner {
    /// Migrate one table. Never returns an error; failures are recorded on
    /// the outcome so the run can move on to the next table.
    pub async fn run(&self, job: &TableJob, cancel: &CancellationToken) -> TableOutcome {
        let started = Instant::now();
        let mut outcome = TableOutcome::new(&job.source, &job.target, job.config.strict);

        outcome.advance(TableStatus::CheckingExistence);
        let columns = match self.prepare(job, &mut outcome).await {
            Ok(columns) => columns,
            Err(Stop::Skip(reason)) => {
                info!("{}: skipped, {}", job.source, reason);
                return outcome.skip(reason, started);
            }
            Err(Stop::Fail(e)) => {
                error!("{}: {}", job.source, e);
                return outcome.fail(&e, started);
            }
        };

        let manager = ConstraintManager::new(self.target.as_ref());
        let snapshot = match manager.suspend(&job.target).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("{}: {}", job.source, e);
                return outcome.fail(&e, started);
            }
        };
        outcome.advance(TableStatus::Suspended);

        outcome.advance(TableStatus::Loading);
        let loaded = self.load(job, &columns, cancel).await;

        // Triggers come back whatever happened to the load.
        let resumed = manager.resume(&snapshot).await;
        outcome.advance(TableStatus::Resumed);
        if let Err(e) = resumed {
            error!("{}: {}", job.target, e);
            outcome.resume_error = Some(e.to_string());
        }

        let stats = match loaded {
            Ok(stats) => stats,
            Err(e) => {
                error!("{}: {}", job.source, e);
                return outcome.fail(&e, started);
            }
        };

        outcome.rows_attempted = stats.rows_attempted;
        outcome.rows_inserted = stats.rows_inserted;
        outcome.rows_failed = stats.rows_failed;
        outcome.keys_rewritten = stats.keys_rewritten;

        if let Some(e) = stats.interrupted {
            let e = match e {
                MigrateError::Cancelled if self.deadline_hit.load(Ordering::SeqCst) => {
                    MigrateError::DeadlineExceeded
                }
                other => other,
            };
            warn!(
                "{}: load stopped after {} rows: {}",
                job.source, outcome.rows_attempted, e
            );
            return outcome.fail(&e, started);
        }

        outcome.advance(TableStatus::Done);
        let outcome = outcome.finish(started);
        info!(
            "{}: done in {}ms ({} inserted, {} failed, {} keys rewritten)",
            job.source,
            outcome.duration_ms,
            outcome.rows_inserted,
            outcome.rows_failed,
            outcome.keys_rewritten
        );
        outcome
    }

    /// Existence check, reconciliation and target reset, in that order.
    async fn prepare(
        &self,
        job: &TableJob,
        outcome: &mut TableOutcome,
    ) -> std::result::Result<ReconciledColumnSet, Stop> {
        if !self.source.table_exists(&job.source).await? {
            return Err(Stop::Skip(SkipReason::TableAbsent));
        }
        let source_columns = introspect(self.source.as_ref(), &job.source).await?;
        if source_columns.is_empty() {
            return Err(Stop::Skip(SkipReason::SchemaConflict));
        }

        let manager = ConstraintManager::new(self.target.as_ref());
        let exclude = &job.config.exclude_columns;

        let columns = match job.config.mode {
            LoadMode::Reset => {
                let landing: Vec<ColumnSpec> = source_columns.iter().map(landing_column).collect();
                let columns = reconcile(&source_columns, &landing, exclude);
                if columns.is_empty() {
                    return Err(Stop::Skip(SkipReason::SchemaConflict));
                }
                let ddl = synthesize(&job.target, &source_columns, exclude)?;

                outcome.advance(TableStatus::Resetting);
                manager.reset(&ddl).await?;
                columns
            }
            LoadMode::Truncate | LoadMode::Append => {
                let target_columns = introspect(self.target.as_ref(), &job.target).await?;
                let columns = reconcile(&source_columns, &target_columns, exclude);
                if columns.is_empty() {
                    if target_columns.is_empty() {
                        warn!("{}: target table {} does not exist", job.source, job.target);
                    }
                    return Err(Stop::Skip(SkipReason::SchemaConflict));
                }

                outcome.advance(TableStatus::Resetting);
                if job.config.mode == LoadMode::Truncate {
                    manager.truncate(&job.target).await?;
                }
                columns
            }
        };

        log_reconciliation(job, &columns);
        Ok(columns)
    }

    async fn load(
        &self,
        job: &TableJob,
        columns: &ReconciledColumnSet,
        cancel: &CancellationToken,
    ) -> Result<LoadStats> {
        let statement = InsertStatement::build(&job.target, &columns.target_columns())?;
        let mut sink = self.target.prepare_insert(&statement).await?;
        let mut rows =
            self.source
                .read_rows(&job.source, &columns.source_columns(), self.read_ahead_rows);

        let mut loader =
            RowLoader::new(job.target.clone()).with_row_id(job.config.row_id_column.clone());
        if let Some(key) = &job.config.natural_key {
            if columns.contains(&key.column) {
                loader = loader.with_natural_key(key);
            } else {
                warn!(
                    "{}: natural key column {} is not migrated, duplicates will not be rewritten",
                    job.source, key.column
                );
            }
        }

        Ok(loader.load(&mut rows, sink.as_mut(), cancel).await)
    }
}

fn log_reconciliation(job: &TableJob, columns: &ReconciledColumnSet) {
    info!(
        "{} -> {}: moving {} columns",
        job.source,
        job.target,
        columns.len()
    );
    if !columns.source_only.is_empty() {
        warn!(
            "{}: source columns missing in target, not migrated: {}",
            job.source,
            columns.source_only.join(", ")
        );
    }
    if !columns.target_only.is_empty() {
        info!(
            "{}: target columns with no source, left to defaults: {}",
            job.target,
            columns.target_only.join(", ")
        );
    }
}
