//! In-memory database double for unit tests.
//!
//! Implements both sides of the migration over shared state so tests can
//! seed tables, run engine code, then inspect rows, trigger state and the
//! log of operations performed.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::schema::{ColumnSpec, TableDescriptor, TriggerMode};
use crate::core::traits::{Database, RowSink, SourceDatabase, TargetDatabase};
use crate::core::value::{Row, SqlValue};
use crate::error::{DbSide, MigrateError, Result};
use crate::schema::CreateTable;
use crate::transfer::InsertStatement;

#[derive(Debug, Default, Clone)]
struct MemoryTable {
    columns: Vec<ColumnSpec>,
    rows: Vec<Vec<SqlValue>>,
    not_null: HashSet<String>,
    unique: HashSet<String>,
    triggers: Vec<(String, TriggerMode)>,
}

impl MemoryTable {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<(String, String), MemoryTable>,
    schemas: Vec<String>,
    operations: Vec<String>,
    unreachable: bool,
    closed: bool,
    failing_tables: HashSet<(String, String)>,
    broken_scans: BTreeMap<(String, String), usize>,
    inserts_before_disconnect: Option<u64>,
}

fn key(table: &TableDescriptor) -> (String, String) {
    (table.schema.clone(), table.name.clone())
}

/// Shared in-memory database. Clones see the same state.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    side: DbSide,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::for_side(DbSide::Target)
    }

    pub fn for_side(side: DbSide) -> Self {
        Self {
            side,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, op: impl Into<String>) {
        self.state().operations.push(op.into());
    }

    pub fn add_table(&self, table: &TableDescriptor, columns: Vec<ColumnSpec>) {
        self.state().tables.insert(
            key(table),
            MemoryTable {
                columns,
                ..MemoryTable::default()
            },
        );
    }

    /// Append a row given as (column, value) pairs; unnamed columns are NULL.
    pub fn insert_row(&self, table: &TableDescriptor, values: Vec<(&str, SqlValue)>) {
        let mut state = self.state();
        let t = state.tables.get_mut(&key(table)).unwrap();
        let mut row = vec![SqlValue::Null; t.columns.len()];
        for (column, value) in values {
            let idx = t.position(column).unwrap();
            row[idx] = value;
        }
        t.rows.push(row);
    }

    pub fn add_not_null(&self, table: &TableDescriptor, column: &str) {
        let mut state = self.state();
        let t = state.tables.get_mut(&key(table)).unwrap();
        t.not_null.insert(column.to_string());
    }

    pub fn add_unique(&self, table: &TableDescriptor, column: &str) {
        let mut state = self.state();
        let t = state.tables.get_mut(&key(table)).unwrap();
        t.unique.insert(column.to_string());
    }

    pub fn add_trigger(&self, table: &TableDescriptor, name: &str, mode: TriggerMode) {
        let mut state = self.state();
        let t = state.tables.get_mut(&key(table)).unwrap();
        t.triggers.push((name.to_string(), mode));
    }

    pub fn trigger_states(&self, table: &TableDescriptor) -> Vec<(String, TriggerMode)> {
        self.state()
            .tables
            .get(&key(table))
            .map(|t| t.triggers.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &TableDescriptor) -> usize {
        self.state()
            .tables
            .get(&key(table))
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn column_values(&self, table: &TableDescriptor, column: &str) -> Vec<SqlValue> {
        let state = self.state();
        let t = state.tables.get(&key(table)).unwrap();
        let idx = t.position(column).unwrap();
        t.rows.iter().map(|r| r[idx].clone()).collect()
    }

    pub fn schemas(&self) -> Vec<String> {
        self.state().schemas.clone()
    }

    /// Make every connection attempt fail.
    pub fn set_unreachable(&self) {
        self.state().unreachable = true;
    }

    /// Make DDL and trigger statements on `table` fail.
    pub fn fail_statements_on(&self, table: &TableDescriptor) {
        self.state().failing_tables.insert(key(table));
    }

    /// Break the scan of `table` after `rows` rows, the way a server-side
    /// error in a view or a cancelled query ends a real scan.
    pub fn break_scan_after(&self, table: &TableDescriptor, rows: usize) {
        self.state().broken_scans.insert(key(table), rows);
    }

    /// Drop the insert session after `n` more successful inserts. The next
    /// session prepared works normally.
    pub fn disconnect_after_inserts(&self, n: u64) {
        self.state().inserts_before_disconnect = Some(n);
    }

    pub fn operations(&self) -> Vec<String> {
        self.state().operations.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn statement(&self, table: &TableDescriptor, op: &str) -> Result<()> {
        self.record(format!("{} {}", op, table));
        if self.state().failing_tables.contains(&key(table)) {
            return Err(MigrateError::ddl(table, "permission denied"));
        }
        Ok(())
    }

    fn with_table<T>(
        &self,
        table: &TableDescriptor,
        f: impl FnOnce(&mut MemoryTable) -> T,
    ) -> Result<T> {
        let mut state = self.state();
        match state.tables.get_mut(&key(table)) {
            Some(t) => Ok(f(t)),
            None => Err(MigrateError::ddl(
                table,
                format!("relation \"{}\" does not exist", table),
            )),
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ping(&self) -> Result<()> {
        self.record("ping");
        if self.state().unreachable {
            return Err(MigrateError::connection(self.side, "connection refused"));
        }
        Ok(())
    }

    async fn table_exists(&self, table: &TableDescriptor) -> Result<bool> {
        Ok(self.state().tables.contains_key(&key(table)))
    }

    async fn table_columns(&self, table: &TableDescriptor) -> Result<Vec<ColumnSpec>> {
        Ok(self
            .state()
            .tables
            .get(&key(table))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn close(&self) {
        self.record("close");
        self.state().closed = true;
    }
}

#[async_trait]
impl SourceDatabase for MemoryDatabase {
    fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[ColumnSpec],
        capacity: usize,
    ) -> mpsc::Receiver<Result<Row>> {
        self.record(format!("read {}", table));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();
        let snapshot = self.state().tables.get(&key(table)).cloned();
        let break_after = self.state().broken_scans.get(&key(table)).copied();
        let table = table.clone();

        tokio::spawn(async move {
            let Some(t) = snapshot else {
                let err = MigrateError::source_scan(&table, "relation does not exist");
                let _ = tx.send(Err(err)).await;
                return;
            };
            let positions: Vec<Option<usize>> = names.iter().map(|n| t.position(n)).collect();
            for (sent, source_row) in t.rows.iter().enumerate() {
                if break_after == Some(sent) {
                    let err = MigrateError::source_scan(&table, "division by zero");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
                let values = positions
                    .iter()
                    .map(|p| p.map(|i| source_row[i].clone()).unwrap_or(SqlValue::Null))
                    .collect();
                if tx.send(Ok(Row::new(Arc::clone(&names), values))).await.is_err() {
                    return;
                }
            }
        });

        rx
    }
}

#[async_trait]
impl TargetDatabase for MemoryDatabase {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        self.record(format!("create schema {}", schema));
        let mut state = self.state();
        if !state.schemas.iter().any(|s| s == schema) {
            state.schemas.push(schema.to_string());
        }
        Ok(())
    }

    async fn drop_table(&self, table: &TableDescriptor) -> Result<()> {
        self.statement(table, "drop")?;
        self.state().tables.remove(&key(table));
        Ok(())
    }

    async fn create_table(&self, ddl: &CreateTable) -> Result<()> {
        self.statement(&ddl.table, "create")?;
        let mut state = self.state();
        if state.tables.contains_key(&key(&ddl.table)) {
            return Err(MigrateError::ddl(&ddl.table, "relation already exists"));
        }
        state.tables.insert(
            key(&ddl.table),
            MemoryTable {
                columns: ddl.columns.clone(),
                ..MemoryTable::default()
            },
        );
        Ok(())
    }

    async fn truncate_table(&self, table: &TableDescriptor) -> Result<()> {
        self.statement(table, "truncate")?;
        self.with_table(table, |t| t.rows.clear())
    }

    async fn trigger_modes(&self, table: &TableDescriptor) -> Result<Vec<(String, TriggerMode)>> {
        self.with_table(table, |t| t.triggers.clone())
    }

    async fn set_all_triggers(&self, table: &TableDescriptor, enabled: bool) -> Result<()> {
        let op = if enabled { "enable triggers" } else { "disable triggers" };
        self.statement(table, op)?;
        self.with_table(table, |t| {
            let mode = if enabled {
                TriggerMode::Origin
            } else {
                TriggerMode::Disabled
            };
            for trigger in &mut t.triggers {
                trigger.1 = mode;
            }
        })
    }

    async fn set_trigger(
        &self,
        table: &TableDescriptor,
        trigger: &str,
        mode: TriggerMode,
    ) -> Result<()> {
        self.statement(table, &format!("set trigger {} {:?}", trigger, mode))?;
        self.with_table(table, |t| {
            for entry in &mut t.triggers {
                if entry.0 == trigger {
                    entry.1 = mode;
                }
            }
        })
    }

    async fn prepare_insert(&self, statement: &InsertStatement) -> Result<Box<dyn RowSink>> {
        self.record(format!("prepare {}", statement.table));
        self.with_table(&statement.table, |_| ())?;
        Ok(Box::new(MemorySink {
            db: self.clone(),
            table: statement.table.clone(),
            columns: statement.columns.clone(),
        }))
    }
}

struct MemorySink {
    db: MemoryDatabase,
    table: TableDescriptor,
    columns: Vec<String>,
}

#[async_trait]
impl RowSink for MemorySink {
    async fn insert(&mut self, values: &[SqlValue]) -> Result<()> {
        let mut state = self.db.state();
        match state.inserts_before_disconnect {
            Some(0) => {
                // Only the session in use dies; later sessions are healthy.
                state.inserts_before_disconnect = None;
                return Err(MigrateError::pool("connection closed", "inserting"));
            }
            Some(remaining) => state.inserts_before_disconnect = Some(remaining - 1),
            None => {}
        }

        let table = &self.table;
        let t = state
            .tables
            .get_mut(&key(table))
            .ok_or_else(|| MigrateError::ddl(table, "relation does not exist"))?;

        let mut row = vec![SqlValue::Null; t.columns.len()];
        for (column, value) in self.columns.iter().zip(values) {
            let idx = t.position(column).ok_or_else(|| MigrateError::RowInsert {
                table: table.to_string(),
                row: String::new(),
                message: format!("column \"{}\" does not exist", column),
            })?;
            row[idx] = value.clone();
        }

        for (idx, column) in t.columns.iter().enumerate() {
            let violation = if t.not_null.contains(&column.name) && row[idx].is_null() {
                Some("violates not-null constraint")
            } else if t.unique.contains(&column.name)
                && !row[idx].is_null()
                && t.rows.iter().any(|existing| existing[idx] == row[idx])
            {
                Some("violates unique constraint")
            } else {
                None
            };
            if let Some(violation) = violation {
                return Err(MigrateError::RowInsert {
                    table: table.to_string(),
                    row: format!("{}={}", column.name, row[idx]),
                    message: format!("column \"{}\" {}", column.name, violation),
                });
            }
        }

        t.rows.push(row);
        Ok(())
    }
}
