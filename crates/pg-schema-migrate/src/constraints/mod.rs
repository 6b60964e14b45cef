//! Target table preparation and trigger suspension around bulk loads.
//!
//! Disabling all triggers also disables the internal triggers PostgreSQL
//! uses to enforce foreign keys, so rows can be loaded in any order. Rows
//! inserted while suspended are not re-checked when triggers come back.
//! Each trigger returns to the exact mode it had, including `ALWAYS` and
//! `REPLICA`.

use tracing::{debug, info};

use crate::core::schema::{TableDescriptor, TriggerMode};
use crate::core::traits::TargetDatabase;
use crate::error::{MigrateError, Result};
use crate::schema::CreateTable;

/// Trigger state captured by [`ConstraintManager::suspend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSnapshot {
    pub table: TableDescriptor,
    /// Every trigger on the table and its mode before suspension.
    pub triggers: Vec<(String, TriggerMode)>,
}

/// Drops, re-creates, empties and suspends target tables.
pub struct ConstraintManager<'a> {
    target: &'a dyn TargetDatabase,
}

impl<'a> ConstraintManager<'a> {
    pub fn new(target: &'a dyn TargetDatabase) -> Self {
        Self { target }
    }

    /// Drop the table (cascading) if it exists, then create it from `ddl`.
    pub async fn reset(&self, ddl: &CreateTable) -> Result<()> {
        debug!("{}: dropping", ddl.table);
        self.target
            .drop_table(&ddl.table)
            .await
            .map_err(|e| table_error(&ddl.table, "drop", e))?;

        debug!("{}: creating\n{}", ddl.table, ddl.sql);
        self.target
            .create_table(ddl)
            .await
            .map_err(|e| table_error(&ddl.table, "create", e))?;

        info!("{}: re-created with {} columns", ddl.table, ddl.columns.len());
        Ok(())
    }

    /// Remove every row and restart identities.
    pub async fn truncate(&self, table: &TableDescriptor) -> Result<()> {
        debug!("{}: truncating", table);
        self.target
            .truncate_table(table)
            .await
            .map_err(|e| table_error(table, "truncate", e))
    }

    /// Disable every trigger on the table, remembering each one's mode.
    pub async fn suspend(&self, table: &TableDescriptor) -> Result<TriggerSnapshot> {
        let triggers = self
            .target
            .trigger_modes(table)
            .await
            .map_err(|e| table_error(table, "read trigger state", e))?;

        self.target
            .set_all_triggers(table, false)
            .await
            .map_err(|e| table_error(table, "disable triggers", e))?;

        debug!("{}: {} triggers disabled", table, triggers.len());
        Ok(TriggerSnapshot {
            table: table.clone(),
            triggers,
        })
    }

    /// Re-enable every trigger, then return those that were not in plain
    /// `ENABLE` mode before [`suspend`](Self::suspend) to their old mode.
    pub async fn resume(&self, snapshot: &TriggerSnapshot) -> Result<()> {
        let table = &snapshot.table;
        self.target
            .set_all_triggers(table, true)
            .await
            .map_err(|e| table_error(table, "enable triggers", e))?;

        for (trigger, mode) in &snapshot.triggers {
            if *mode == TriggerMode::Origin {
                continue;
            }
            self.target
                .set_trigger(table, trigger, *mode)
                .await
                .map_err(|e| table_error(table, &format!("restore trigger {}", trigger), e))?;
        }

        debug!("{}: triggers resumed", table);
        Ok(())
    }
}

fn table_error(table: &TableDescriptor, action: &str, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::Ddl { .. } => err,
        other => MigrateError::ddl(table, format!("{}: {}", action, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnSpec;
    use crate::core::value::SqlValue;
    use crate::core::traits::Database;
    use crate::schema::synthesize;
    use crate::testing::MemoryDatabase;

    fn station() -> TableDescriptor {
        TableDescriptor::new("public", "station")
    }

    #[tokio::test]
    async fn test_reset_replaces_table() {
        let db = MemoryDatabase::new();
        db.add_table(&station(), vec![ColumnSpec::simple("legacy", "text")]);
        db.insert_row(&station(), vec![("legacy", "x".into())]);

        let ddl = synthesize(&station(), &[ColumnSpec::simple("id", "integer")], &[]).unwrap();
        ConstraintManager::new(&db).reset(&ddl).await.unwrap();

        let columns = db.table_columns(&station()).await.unwrap();
        assert_eq!(columns, vec![ColumnSpec::simple("id", "integer")]);
        assert_eq!(db.row_count(&station()), 0);
    }

    #[tokio::test]
    async fn test_reset_creates_missing_table() {
        let db = MemoryDatabase::new();
        let ddl = synthesize(&station(), &[ColumnSpec::simple("id", "integer")], &[]).unwrap();
        ConstraintManager::new(&db).reset(&ddl).await.unwrap();
        assert!(db.table_exists(&station()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_failure_is_ddl_error() {
        let db = MemoryDatabase::new();
        db.fail_statements_on(&station());
        let ddl = synthesize(&station(), &[ColumnSpec::simple("id", "integer")], &[]).unwrap();
        let err = ConstraintManager::new(&db).reset(&ddl).await.unwrap_err();
        assert!(matches!(err, MigrateError::Ddl { .. }));
    }

    #[tokio::test]
    async fn test_truncate_empties_table() {
        let db = MemoryDatabase::new();
        db.add_table(&station(), vec![ColumnSpec::simple("id", "integer")]);
        db.insert_row(&station(), vec![("id", SqlValue::I32(1))]);
        ConstraintManager::new(&db).truncate(&station()).await.unwrap();
        assert_eq!(db.row_count(&station()), 0);
    }

    #[tokio::test]
    async fn test_suspend_then_resume_restores_trigger_state() {
        let db = MemoryDatabase::new();
        db.add_table(&station(), vec![ColumnSpec::simple("id", "integer")]);
        db.add_trigger(&station(), "audit_station", TriggerMode::Origin);
        db.add_trigger(&station(), "legacy_sync", TriggerMode::Disabled);
        db.add_trigger(&station(), "replicate_always", TriggerMode::Always);
        db.add_trigger(&station(), "replica_only", TriggerMode::Replica);
        db.add_trigger(&station(), "RI_ConstraintTrigger_c_16420", TriggerMode::Disabled);
        let before = db.trigger_states(&station());

        let manager = ConstraintManager::new(&db);
        let snapshot = manager.suspend(&station()).await.unwrap();
        assert_eq!(snapshot.triggers, before);
        assert!(db
            .trigger_states(&station())
            .iter()
            .all(|(_, mode)| *mode == TriggerMode::Disabled));

        manager.resume(&snapshot).await.unwrap();
        assert_eq!(db.trigger_states(&station()), before);

        let restores: Vec<String> = db
            .operations()
            .into_iter()
            .filter(|op| op.starts_with("set trigger"))
            .collect();
        assert_eq!(restores.len(), 4, "{:?}", restores);
    }

    #[tokio::test]
    async fn test_suspend_missing_table_fails() {
        let db = MemoryDatabase::new();
        let err = ConstraintManager::new(&db)
            .suspend(&station())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Ddl { .. }));
    }
}
