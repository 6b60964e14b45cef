//! Row streaming from source to target with per-row failure isolation.
//!
//! Rows are read through a bounded channel and inserted one statement at a
//! time. A rejected row is logged and counted; the load moves on to the next
//! row. Only errors that leave the session or the source cursor unusable,
//! or cancellation, stop a table's load.

pub mod dedup;

use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::NaturalKeyConfig;
use crate::core::identifier::{quote_pg, validate_type_name};
use crate::core::schema::{ColumnSpec, TableDescriptor};
use crate::core::traits::RowSink;
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

pub use dedup::DuplicateKeyResolver;

/// Rows between progress log lines.
const PROGRESS_INTERVAL: u64 = 10_000;

/// A positional `INSERT` for the reconciled columns of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: TableDescriptor,
    pub columns: Vec<String>,
    pub sql: String,
}

impl InsertStatement {
    /// Build the insert for `columns`, typed as the target reports them.
    ///
    /// Every value is bound as text and cast to the column's base type, so
    /// the server applies its own input conversion and the column's length
    /// and precision limits on assignment.
    pub fn build(table: &TableDescriptor, columns: &[ColumnSpec]) -> Result<Self> {
        if columns.is_empty() {
            return Err(MigrateError::ddl(table, "insert requires at least one column"));
        }

        let mut names = Vec::with_capacity(columns.len());
        let mut placeholders = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            validate_type_name(&column.cast_type)?;
            names.push(quote_pg(&column.name)?);
            placeholders.push(format!("${}::text::{}", i + 1, column.cast_type));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.qualified()?,
            names.join(", "),
            placeholders.join(", ")
        );

        Ok(Self {
            table: table.clone(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            sql,
        })
    }
}

/// Counts for one table's load.
#[derive(Debug, Default)]
pub struct LoadStats {
    pub rows_attempted: u64,
    pub rows_inserted: u64,
    pub rows_failed: u64,
    pub keys_rewritten: u64,
    /// Why the load stopped before the source was exhausted.
    pub interrupted: Option<MigrateError>,
}

/// Inserts a table's row stream into the target.
pub struct RowLoader {
    table: TableDescriptor,
    row_id_column: Option<String>,
    natural_key: Option<(String, DuplicateKeyResolver)>,
}

impl RowLoader {
    pub fn new(table: TableDescriptor) -> Self {
        Self {
            table,
            row_id_column: None,
            natural_key: None,
        }
    }

    /// Column whose value identifies rows in failure messages.
    pub fn with_row_id(mut self, column: Option<String>) -> Self {
        self.row_id_column = column;
        self
    }

    /// Rewrite repeated values of a natural-key column.
    pub fn with_natural_key(mut self, key: &NaturalKeyConfig) -> Self {
        self.natural_key = Some((key.column.clone(), DuplicateKeyResolver::from_config(key)));
        self
    }

    /// Insert every row from `rows` through `sink` until the stream ends,
    /// a non-row error occurs, or `cancel` fires.
    pub async fn load(
        mut self,
        rows: &mut mpsc::Receiver<Result<Row>>,
        sink: &mut dyn RowSink,
        cancel: &CancellationToken,
    ) -> LoadStats {
        let started = Instant::now();
        let mut stats = LoadStats::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stats.interrupted = Some(MigrateError::Cancelled);
                    break;
                }
                next = rows.recv() => next,
            };

            let Some(next) = next else { break };

            let mut row = match next {
                Ok(row) => row,
                Err(e) if e.is_row_level() => {
                    stats.rows_attempted += 1;
                    stats.rows_failed += 1;
                    error!(
                        "{}: row {} could not be read: {}",
                        self.table, stats.rows_attempted, e
                    );
                    continue;
                }
                Err(e) => {
                    // Not a row: the rest of the source was never read.
                    error!(
                        "{}: source scan stopped after {} rows: {}",
                        self.table, stats.rows_attempted, e
                    );
                    stats.interrupted = Some(e);
                    break;
                }
            };
            stats.rows_attempted += 1;
            let ordinal = stats.rows_attempted;

            let replaced_key = self.rewrite_natural_key(&mut row);

            match sink.insert(row.values()).await {
                Ok(()) => stats.rows_inserted += 1,
                Err(e) if e.is_row_level() => {
                    stats.rows_failed += 1;
                    let failure = MigrateError::RowInsert {
                        table: self.table.to_string(),
                        row: self.describe_row(ordinal, &row, replaced_key.as_ref()),
                        message: e.to_string(),
                    };
                    error!("{}", failure);
                }
                Err(e) => {
                    stats.rows_failed += 1;
                    error!(
                        "{}: insert session failed at {}: {}",
                        self.table,
                        self.describe_row(ordinal, &row, replaced_key.as_ref()),
                        e
                    );
                    stats.interrupted = Some(e);
                    break;
                }
            }

            if ordinal % PROGRESS_INTERVAL == 0 {
                info!(
                    "{}: {} rows processed ({} failed)",
                    self.table, ordinal, stats.rows_failed
                );
            }
        }

        if let Some((_, resolver)) = &self.natural_key {
            stats.keys_rewritten = resolver.rewritten();
        }

        debug!(
            "{}: load finished in {:?}: attempted={} inserted={} failed={} rewritten={}",
            self.table,
            started.elapsed(),
            stats.rows_attempted,
            stats.rows_inserted,
            stats.rows_failed,
            stats.keys_rewritten
        );
        stats
    }

    /// Rewrite a repeated natural key in place, returning the source value
    /// it replaced.
    fn rewrite_natural_key(&mut self, row: &mut Row) -> Option<SqlValue> {
        let (column, resolver) = self.natural_key.as_mut()?;
        let value = row.get(column)?;

        let original = value.to_param_text();
        let before = resolver.rewritten();
        let effective = resolver.resolve(original.as_deref());
        if resolver.rewritten() == before {
            return None;
        }
        debug!(
            "{}: duplicate {} {:?} rewritten to {:?}",
            self.table, column, original, effective
        );
        let replaced = value.clone();
        row.set(column, SqlValue::from(effective));
        Some(replaced)
    }

    /// Label a row for failure messages by its source identity.
    fn describe_row(&self, ordinal: u64, row: &Row, replaced_key: Option<&SqlValue>) -> String {
        let id_column = self
            .row_id_column
            .as_deref()
            .or(self.natural_key.as_ref().map(|(c, _)| c.as_str()))
            .or(if row.get("id").is_some() { Some("id") } else { None });

        let source_value = |column: &str| match (&self.natural_key, replaced_key) {
            (Some((key, _)), Some(original)) if key == column => Some(original),
            _ => row.get(column),
        };

        match id_column.and_then(|c| source_value(c).map(|v| (c, v))) {
            Some((column, value)) => format!("row {} ({}={})", ordinal, column, value),
            None => format!("row {}", ordinal),
        }
    }
}
