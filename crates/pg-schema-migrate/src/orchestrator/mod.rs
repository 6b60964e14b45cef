//! Runs the configured tables rank by rank against one source and one target.
//!
//! Tables run in ascending rank. Tables that share a rank may run
//! concurrently, up to `migration.workers` at a time; a rank only starts
//! once every table of the previous rank has finished.

mod plan;
mod report;
mod table;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, LoadMode};
use crate::core::traits::{Database, SourceDatabase, TargetDatabase};
use crate::drivers::PgDatabase;
use crate::error::{DbSide, MigrateError, Result};

pub use plan::{HealthCheckResult, SideHealth, TablePlan};
pub use report::{MigrationReport, RunStatus, SkipReason, TableOutcome, TableStatus};
pub use table::TableJob;

use table::TableRunner;

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceDatabase>,
    target: Arc<dyn TargetDatabase>,
}

impl Orchestrator {
    /// Connect to both databases.
    pub async fn new(config: Config) -> Result<Self> {
        let source =
            PgDatabase::connect(DbSide::Source, &config.source, &config.migration).await?;
        let target =
            match PgDatabase::connect(DbSide::Target, &config.target, &config.migration).await {
                Ok(target) => target,
                Err(e) => {
                    source.close().await;
                    return Err(e);
                }
            };

        Ok(Self::with_databases(
            config,
            Arc::new(source),
            Arc::new(target),
        ))
    }

    /// Build an orchestrator over already connected databases.
    pub fn with_databases(
        config: Config,
        source: Arc<dyn SourceDatabase>,
        target: Arc<dyn TargetDatabase>,
    ) -> Self {
        Self {
            config,
            source,
            target,
        }
    }

    /// Probe both databases described by `config`, without failing on
    /// either being unreachable.
    pub async fn check_health(config: &Config) -> HealthCheckResult {
        let source = probe_config(DbSide::Source, config).await;
        let target = probe_config(DbSide::Target, config).await;
        HealthCheckResult::new(source, target)
    }

    /// Table jobs in execution order: ascending rank, then config order.
    pub fn jobs(&self) -> Vec<TableJob> {
        let mut jobs: Vec<TableJob> = self
            .config
            .tables
            .iter()
            .map(|t| {
                TableJob::new(
                    t.clone(),
                    &self.config.source.schema,
                    &self.config.target.schema,
                )
            })
            .collect();
        jobs.sort_by_key(|job| job.config.rank);
        jobs
    }

    /// Run the migration. Both databases are closed when this returns.
    ///
    /// Fails only when a database is unreachable at start; everything after
    /// that is recorded per table in the report.
    pub async fn run(self, cancel: CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(%run_id, tables = self.config.tables.len(), "migration run starting");

        if let Err(e) = self.ping_both().await {
            error!("{}", e);
            self.close().await;
            return Err(e);
        }

        let run_token = cancel.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let timer = self
            .config
            .migration
            .run_timeout_secs
            .map(|secs| spawn_deadline(secs, run_token.clone(), Arc::clone(&deadline_hit)));

        let tables = self.migrate_tables(&run_token, &deadline_hit).await;

        if let Some(timer) = timer {
            timer.abort();
        }
        self.close().await;

        let interrupted = if deadline_hit.load(Ordering::SeqCst) {
            Some(RunStatus::DeadlineExceeded)
        } else if cancel.is_cancelled() {
            Some(RunStatus::Cancelled)
        } else {
            None
        };

        let report = MigrationReport::new(run_id, started_at, tables, interrupted);
        info!(
            "Migration {}: {} tables ({} done, {} skipped, {} failed), {} rows inserted, {} rows failed, {:.1}s",
            report.status,
            report.tables_total,
            report.tables_done,
            report.tables_skipped,
            report.tables_failed,
            report.rows_inserted,
            report.rows_failed,
            report.duration_seconds
        );
        if !report.is_success() {
            warn!("Tables with failures: {}", report.failed_tables().join(", "));
        }
        Ok(report)
    }

    /// Describe what a run would do, without changing the target.
    pub async fn plan(self) -> Result<Vec<TablePlan>> {
        let result = self.build_plan().await;
        self.close().await;
        result
    }

    /// Probe both databases, then close them.
    pub async fn health_check(self) -> HealthCheckResult {
        let source = SideHealth::probe(self.source.as_ref()).await;
        let target = SideHealth::probe(self.target.as_ref()).await;
        self.close().await;
        HealthCheckResult::new(source, target)
    }

    async fn build_plan(&self) -> Result<Vec<TablePlan>> {
        self.ping_both().await?;
        let mut plans = Vec::new();
        for job in self.jobs() {
            plans.push(plan::plan_table(self.source.as_ref(), self.target.as_ref(), &job).await?);
        }
        Ok(plans)
    }

    async fn ping_both(&self) -> Result<()> {
        self.source.ping().await?;
        self.target.ping().await?;
        Ok(())
    }

    async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    async fn migrate_tables(
        &self,
        cancel: &CancellationToken,
        deadline_hit: &Arc<AtomicBool>,
    ) -> Vec<TableOutcome> {
        let jobs = self.jobs();
        let workers = self.config.migration.workers.max(1);
        info!(
            "Migrating {} tables with {} workers",
            jobs.len(),
            workers
        );

        if jobs.iter().any(|j| j.config.mode == LoadMode::Reset)
            && self.config.migration.create_target_schema
        {
            if let Err(e) = self.target.create_schema(&self.config.target.schema).await {
                warn!(
                    "Could not create target schema {}: {}",
                    self.config.target.schema, e
                );
            }
        }

        let runner = TableRunner {
            source: Arc::clone(&self.source),
            target: Arc::clone(&self.target),
            read_ahead_rows: self.config.migration.read_ahead_rows,
            deadline_hit: Arc::clone(deadline_hit),
        };

        let mut outcomes = Vec::with_capacity(jobs.len());
        for group in rank_groups(jobs) {
            if workers == 1 || group.len() == 1 {
                for job in group {
                    if cancel.is_cancelled() {
                        outcomes.push(cancelled(&job));
                        continue;
                    }
                    outcomes.push(runner.run(&job, cancel).await);
                }
            } else {
                outcomes.extend(run_concurrently(&runner, group, workers, cancel).await);
            }
        }
        outcomes
    }
}

/// Split jobs already sorted by rank into runs of equal rank.
fn rank_groups(jobs: Vec<TableJob>) -> Vec<Vec<TableJob>> {
    let mut groups: Vec<Vec<TableJob>> = Vec::new();
    for job in jobs {
        match groups.last_mut() {
            Some(group) if group[0].config.rank == job.config.rank => group.push(job),
            _ => groups.push(vec![job]),
        }
    }
    groups
}

async fn run_concurrently(
    runner: &TableRunner,
    group: Vec<TableJob>,
    workers: usize,
    cancel: &CancellationToken,
) -> Vec<TableOutcome> {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut handles: Vec<(TableJob, Option<JoinHandle<TableOutcome>>)> = Vec::new();

    for job in group {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            handles.push((job, None));
            continue;
        };

        let runner = runner.clone();
        let token = cancel.clone();
        let task_job = job.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            runner.run(&task_job, &token).await
        });
        handles.push((job, Some(handle)));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (job, handle) in handles {
        let Some(handle) = handle else {
            outcomes.push(cancelled(&job));
            continue;
        };
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!("{}: task panicked - {}", job.source, e);
                let err = MigrateError::pool(e, format!("migrating {}", job.source));
                outcomes.push(
                    TableOutcome::new(&job.source, &job.target, job.config.strict)
                        .fail(&err, Instant::now()),
                );
            }
        }
    }
    outcomes
}

fn cancelled(job: &TableJob) -> TableOutcome {
    TableOutcome::new(&job.source, &job.target, job.config.strict)
        .skip(SkipReason::Cancelled, Instant::now())
}

fn spawn_deadline(
    secs: u64,
    token: CancellationToken,
    deadline_hit: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                warn!("Run deadline of {}s exceeded, stopping", secs);
                deadline_hit.store(true, Ordering::SeqCst);
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

async fn probe_config(side: DbSide, config: &Config) -> SideHealth {
    let db_config = match side {
        DbSide::Source => &config.source,
        DbSide::Target => &config.target,
    };
    let started = Instant::now();
    match PgDatabase::connect(side, db_config, &config.migration).await {
        Ok(db) => {
            let health = SideHealth::probe(&db).await;
            db.close().await;
            health
        }
        Err(e) => SideHealth {
            connected: false,
            latency_ms: started.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
        },
    }
}
