//! Database seams used by the migration engine.
//!
//! - [`Database`]: catalog queries shared by both sides
//! - [`SourceDatabase`]: streams rows out of the legacy schema
//! - [`TargetDatabase`]: DDL, trigger control and row inserts on the new schema
//! - [`RowSink`]: a prepared insert bound to one session
//!
//! The PostgreSQL implementation lives in `drivers::postgres`; tests use an
//! in-memory implementation.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::schema::CreateTable;
use crate::transfer::InsertStatement;

use super::schema::{ColumnSpec, TableDescriptor, TriggerMode};
use super::value::{Row, SqlValue};

/// Operations available on either side of the migration.
#[async_trait]
pub trait Database: Send + Sync {
    /// Round-trip a trivial statement to prove the database is reachable.
    async fn ping(&self) -> Result<()>;

    /// Whether the table exists.
    async fn table_exists(&self, table: &TableDescriptor) -> Result<bool>;

    /// Columns of the table in ordinal order. Empty if the table is absent.
    async fn table_columns(&self, table: &TableDescriptor) -> Result<Vec<ColumnSpec>>;

    /// Release every pooled connection.
    async fn close(&self);
}

/// Row streaming from the source.
#[async_trait]
pub trait SourceDatabase: Database {
    /// Start streaming every row of `table`, projected to `columns`.
    ///
    /// Rows arrive in source order. A background task fills the channel, so
    /// at most `capacity` rows are buffered ahead of the consumer. A row that
    /// cannot be decoded is sent as a `Decode` error and streaming continues;
    /// anything that ends the scan early is sent last as `SourceScan`.
    fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[ColumnSpec],
        capacity: usize,
    ) -> mpsc::Receiver<Result<Row>>;
}

/// Schema and data operations on the target.
#[async_trait]
pub trait TargetDatabase: Database {
    /// Create the schema if it does not exist.
    async fn create_schema(&self, schema: &str) -> Result<()>;

    /// Drop the table if it exists, cascading to dependent objects.
    async fn drop_table(&self, table: &TableDescriptor) -> Result<()>;

    /// Execute a synthesized `CREATE TABLE`.
    async fn create_table(&self, ddl: &CreateTable) -> Result<()>;

    /// Remove every row and restart owned sequences, cascading.
    async fn truncate_table(&self, table: &TableDescriptor) -> Result<()>;

    /// Every trigger on the table with its current mode, internal ones
    /// included, ordered by name.
    async fn trigger_modes(&self, table: &TableDescriptor) -> Result<Vec<(String, TriggerMode)>>;

    /// Enable or disable every trigger on the table, including the internal
    /// ones that enforce foreign keys.
    async fn set_all_triggers(&self, table: &TableDescriptor, enabled: bool) -> Result<()>;

    /// Put one named trigger in `mode`.
    async fn set_trigger(&self, table: &TableDescriptor, trigger: &str, mode: TriggerMode)
        -> Result<()>;

    /// Prepare a parameterized insert on a dedicated session.
    async fn prepare_insert(&self, statement: &InsertStatement) -> Result<Box<dyn RowSink>>;
}

/// Inserts rows one statement at a time.
///
/// Each insert commits on its own, so a rejected row never affects the rows
/// before or after it.
#[async_trait]
pub trait RowSink: Send {
    /// Insert one row. Values are in the statement's column order.
    async fn insert(&mut self, values: &[SqlValue]) -> Result<()>;
}
