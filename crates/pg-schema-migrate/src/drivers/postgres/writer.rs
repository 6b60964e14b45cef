//! Target DDL, trigger control and row inserts.

use async_trait::async_trait;
use deadpool_postgres::Object;
use tokio_postgres::types::ToSql;
use tokio_postgres::Statement;
use tracing::debug;

use super::PgDatabase;
use crate::core::identifier::quote_pg;
use crate::core::schema::{TableDescriptor, TriggerMode};
use crate::core::traits::{RowSink, TargetDatabase};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::schema::CreateTable;
use crate::transfer::InsertStatement;

/// Every trigger on a table, foreign-key triggers included, with its mode.
const TRIGGER_MODES_QUERY: &str = r#"
    SELECT t.tgname::text, t.tgenabled::text
    FROM pg_catalog.pg_trigger t
    JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relname = $2
    ORDER BY t.tgname
"#;

fn trigger_action(enabled: bool) -> &'static str {
    if enabled {
        "ENABLE"
    } else {
        "DISABLE"
    }
}

#[async_trait]
impl TargetDatabase for PgDatabase {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(schema)?);
        let client = self.client("creating schema on").await?;
        client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn drop_table(&self, table: &TableDescriptor) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {} CASCADE", table.qualified()?);
        self.execute_ddl(table, &sql).await
    }

    async fn create_table(&self, ddl: &CreateTable) -> Result<()> {
        self.execute_ddl(&ddl.table, &ddl.sql).await
    }

    async fn truncate_table(&self, table: &TableDescriptor) -> Result<()> {
        let sql = format!(
            "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
            table.qualified()?
        );
        self.execute_ddl(table, &sql).await
    }

    async fn trigger_modes(&self, table: &TableDescriptor) -> Result<Vec<(String, TriggerMode)>> {
        let client = self.client("reading triggers on").await?;
        let rows = client
            .query(TRIGGER_MODES_QUERY, &[&table.schema, &table.name])
            .await?;
        let mut modes = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let code: String = row.try_get(1)?;
            let mode = TriggerMode::from_pg_code(&code).ok_or_else(|| {
                MigrateError::ddl(table, format!("trigger {} has unknown mode {:?}", name, code))
            })?;
            modes.push((name, mode));
        }
        Ok(modes)
    }

    async fn set_all_triggers(&self, table: &TableDescriptor, enabled: bool) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} {} TRIGGER ALL",
            table.qualified()?,
            trigger_action(enabled)
        );
        self.execute_ddl(table, &sql).await
    }

    async fn set_trigger(
        &self,
        table: &TableDescriptor,
        trigger: &str,
        mode: TriggerMode,
    ) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} {} TRIGGER {}",
            table.qualified()?,
            mode.alter_action(),
            quote_pg(trigger)?
        );
        self.execute_ddl(table, &sql).await
    }

    async fn prepare_insert(&self, statement: &InsertStatement) -> Result<Box<dyn RowSink>> {
        let client = self.client("preparing insert on").await?;
        let prepared = client
            .prepare(&statement.sql)
            .await
            .map_err(|e| MigrateError::ddl(&statement.table, e))?;
        debug!("{}: prepared {}", statement.table, statement.sql);
        Ok(Box::new(PgRowSink {
            client,
            statement: prepared,
        }))
    }
}

/// Prepared insert holding its own pooled session.
pub struct PgRowSink {
    client: Object,
    statement: Statement,
}

#[async_trait]
impl RowSink for PgRowSink {
    async fn insert(&mut self, values: &[SqlValue]) -> Result<()> {
        let params: Vec<Option<String>> = values.iter().map(SqlValue::to_param_text).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.client.execute(&self.statement, &refs).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_action() {
        assert_eq!(trigger_action(true), "ENABLE");
        assert_eq!(trigger_action(false), "DISABLE");
    }
}
