//! Per-table outcomes and the run report.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::schema::TableDescriptor;
use crate::error::{
    MigrateError, Result, EXIT_CANCELLED, EXIT_DEADLINE, EXIT_INCOMPLETE,
};

/// Position of a table in its migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Pending,
    CheckingExistence,
    Skipped,
    Resetting,
    Suspended,
    Loading,
    Resumed,
    Done,
    Failed,
}

impl TableStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TableStatus::Skipped | TableStatus::Done | TableStatus::Failed)
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Pending => "PENDING",
            TableStatus::CheckingExistence => "CHECKING_EXISTENCE",
            TableStatus::Skipped => "SKIPPED",
            TableStatus::Resetting => "RESETTING",
            TableStatus::Suspended => "SUSPENDED",
            TableStatus::Loading => "LOADING",
            TableStatus::Resumed => "RESUMED",
            TableStatus::Done => "DONE",
            TableStatus::Failed => "FAILED",
        };
        f.pad(s)
    }
}

/// Why a table was skipped. None of these fail the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The source table does not exist.
    TableAbsent,
    /// No column survives reconciliation.
    SchemaConflict,
    /// The run was interrupted before the table started.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TableAbsent => f.write_str("source table does not exist"),
            SkipReason::SchemaConflict => f.write_str("no columns to move"),
            SkipReason::Cancelled => f.write_str("run interrupted"),
        }
    }
}

/// Result of migrating one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOutcome {
    /// Source table, `schema.name`.
    pub table: String,

    /// Target table, `schema.name`.
    pub target_table: String,

    pub status: TableStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,

    /// Whether row failures count against the run.
    pub strict: bool,

    pub rows_attempted: u64,
    pub rows_inserted: u64,
    pub rows_failed: u64,
    pub keys_rewritten: u64,

    /// Error that stopped the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,

    /// Error re-enabling triggers after the load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_error: Option<String>,

    pub duration_ms: u64,
}

impl TableOutcome {
    pub fn new(source: &TableDescriptor, target: &TableDescriptor, strict: bool) -> Self {
        Self {
            table: source.to_string(),
            target_table: target.to_string(),
            status: TableStatus::Pending,
            skip_reason: None,
            strict,
            rows_attempted: 0,
            rows_inserted: 0,
            rows_failed: 0,
            keys_rewritten: 0,
            fatal_error: None,
            resume_error: None,
            duration_ms: 0,
        }
    }

    /// Move to the next state.
    pub fn advance(&mut self, status: TableStatus) {
        debug!("{}: {} -> {}", self.table, self.status, status);
        self.status = status;
    }

    pub(crate) fn skip(mut self, reason: SkipReason, started: Instant) -> Self {
        self.advance(TableStatus::Skipped);
        self.skip_reason = Some(reason);
        self.finish(started)
    }

    pub(crate) fn fail(mut self, err: &MigrateError, started: Instant) -> Self {
        self.advance(TableStatus::Failed);
        self.fatal_error = Some(err.to_string());
        self.finish(started)
    }

    pub(crate) fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }

    /// Whether this table makes the run unsuccessful.
    pub fn is_failure(&self) -> bool {
        self.status == TableStatus::Failed
            || (self.strict && (self.rows_failed > 0 || self.resume_error.is_some()))
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table finished without a counted failure.
    Completed,
    /// Every table ran, but some failed or lost rows.
    Incomplete,
    /// Interrupted by a signal.
    Cancelled,
    /// Interrupted by the run deadline.
    DeadlineExceeded,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Incomplete => f.write_str("incomplete"),
            RunStatus::Cancelled => f.write_str("cancelled"),
            RunStatus::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// Run start (UTC).
    pub started_at: DateTime<Utc>,

    /// Run end (UTC).
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Outcomes in execution order.
    pub tables: Vec<TableOutcome>,

    pub tables_total: usize,
    pub tables_done: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,

    pub rows_attempted: u64,
    pub rows_inserted: u64,
    pub rows_failed: u64,
    pub keys_rewritten: u64,
}

impl MigrationReport {
    /// Aggregate table outcomes.
    ///
    /// `interrupted` is the run-level interruption, if any; it takes
    /// precedence over table failures when choosing the status.
    pub fn new(
        run_id: String,
        started_at: DateTime<Utc>,
        tables: Vec<TableOutcome>,
        interrupted: Option<RunStatus>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let count = |status: TableStatus| tables.iter().filter(|t| t.status == status).count();
        let status = match interrupted {
            Some(status) => status,
            None if tables.iter().any(TableOutcome::is_failure) => RunStatus::Incomplete,
            None => RunStatus::Completed,
        };

        Self {
            run_id,
            status,
            started_at,
            completed_at,
            duration_seconds,
            tables_total: tables.len(),
            tables_done: count(TableStatus::Done),
            tables_skipped: count(TableStatus::Skipped),
            tables_failed: count(TableStatus::Failed),
            rows_attempted: tables.iter().map(|t| t.rows_attempted).sum(),
            rows_inserted: tables.iter().map(|t| t.rows_inserted).sum(),
            rows_failed: tables.iter().map(|t| t.rows_failed).sum(),
            keys_rewritten: tables.iter().map(|t| t.keys_rewritten).sum(),
            tables,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Tables that count against the run.
    pub fn failed_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.is_failure())
            .map(|t| t.table.clone())
            .collect()
    }

    /// Process exit code: 0 on success.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Completed => 0,
            RunStatus::Incomplete => EXIT_INCOMPLETE,
            RunStatus::Cancelled => EXIT_CANCELLED,
            RunStatus::DeadlineExceeded => EXIT_DEADLINE,
        }
    }

    /// Error equivalent of an unsuccessful report.
    pub fn to_error(&self) -> Option<MigrateError> {
        match self.status {
            RunStatus::Completed => None,
            RunStatus::Incomplete => Some(MigrateError::Incomplete {
                tables: self.failed_tables().join(", "),
            }),
            RunStatus::Cancelled => Some(MigrateError::Cancelled),
            RunStatus::DeadlineExceeded => Some(MigrateError::DeadlineExceeded),
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, status: TableStatus) -> TableOutcome {
        let table = TableDescriptor::new("public", name);
        let mut o = TableOutcome::new(&table, &table, true);
        o.status = status;
        o
    }

    #[test]
    fn test_completed_report() {
        let mut done = outcome("station", TableStatus::Done);
        done.rows_attempted = 3;
        done.rows_inserted = 3;
        let report = MigrationReport::new(
            "run-1".into(),
            Utc::now(),
            vec![done, outcome("ghost", TableStatus::Skipped)],
            None,
        );
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.tables_done, 1);
        assert_eq!(report.tables_skipped, 1);
        assert_eq!(report.rows_inserted, 3);
        assert!(report.to_error().is_none());
    }

    #[test]
    fn test_row_failures_only_count_for_strict_tables() {
        let mut lenient = outcome("chargers", TableStatus::Done);
        lenient.strict = false;
        lenient.rows_failed = 2;
        assert!(!lenient.is_failure());

        let mut strict = outcome("station", TableStatus::Done);
        strict.rows_failed = 1;
        assert!(strict.is_failure());

        let report = MigrationReport::new("r".into(), Utc::now(), vec![lenient, strict], None);
        assert_eq!(report.status, RunStatus::Incomplete);
        assert_eq!(report.exit_code(), EXIT_INCOMPLETE);
        assert_eq!(report.failed_tables(), vec!["public.station"]);
    }

    #[test]
    fn test_resume_error_fails_strict_table() {
        let mut o = outcome("station", TableStatus::Done);
        o.resume_error = Some("permission denied".into());
        assert!(o.is_failure());
    }

    #[test]
    fn test_interruption_overrides_status() {
        let report = MigrationReport::new(
            "r".into(),
            Utc::now(),
            vec![outcome("station", TableStatus::Failed)],
            Some(RunStatus::DeadlineExceeded),
        );
        assert_eq!(report.exit_code(), EXIT_DEADLINE);
        assert!(matches!(report.to_error(), Some(MigrateError::DeadlineExceeded)));
    }

    #[test]
    fn test_report_json_uses_state_names() {
        let mut skipped = outcome("ghost", TableStatus::Pending);
        skipped = skipped.skip(SkipReason::TableAbsent, Instant::now());
        let report = MigrationReport::new("r".into(), Utc::now(), vec![skipped], None);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"SKIPPED\""));
        assert!(json.contains("\"skip_reason\": \"table_absent\""));
        assert!(json.contains("\"status\": \"completed\""));
        assert!(!json.contains("fatal_error"));
    }
}
