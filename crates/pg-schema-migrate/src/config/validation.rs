//! Configuration validation.

use std::collections::HashSet;

use super::{Config, DatabaseConfig};
use crate::core::identifier::validate_identifier;
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Reject configurations that cannot produce a meaningful run.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("source", &config.source)?;
    validate_database("target", &config.target)?;

    // Source and target must differ.
    if config.source.url.is_none()
        && config.target.url.is_none()
        && config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
        && config.source.schema == config.target.schema
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database schema".into(),
        ));
    }
    if let (Some(source), Some(target)) = (&config.source.url, &config.target.url) {
        if source == target && config.source.schema == config.target.schema {
            return Err(MigrateError::Config(
                "source and target cannot be the same database schema".into(),
            ));
        }
    }

    if config.migration.workers == 0 {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if config.migration.read_ahead_rows == 0 {
        return Err(MigrateError::Config(
            "migration.read_ahead_rows must be at least 1".into(),
        ));
    }
    if config.migration.run_timeout_secs == Some(0) {
        return Err(MigrateError::Config(
            "migration.run_timeout_secs must be at least 1".into(),
        ));
    }

    if config.tables.is_empty() {
        return Err(MigrateError::Config("tables must list at least one table".into()));
    }

    let mut seen = HashSet::new();
    for table in &config.tables {
        validate_identifier(&table.name)
            .map_err(|e| MigrateError::Config(format!("tables[].name: {}", e)))?;
        if let Some(ref target) = table.target_name {
            validate_identifier(target).map_err(|e| {
                MigrateError::Config(format!("tables.{}.target_name: {}", table.name, e))
            })?;
        }
        if !seen.insert(table.target_table().to_string()) {
            return Err(MigrateError::Config(format!(
                "target table '{}' is listed more than once",
                table.target_table()
            )));
        }
        if let Some(ref key) = table.natural_key {
            validate_identifier(&key.column).map_err(|e| {
                MigrateError::Config(format!("tables.{}.natural_key.column: {}", table.name, e))
            })?;
            if key.suffix.is_empty() {
                return Err(MigrateError::Config(format!(
                    "tables.{}.natural_key.suffix cannot be empty",
                    table.name
                )));
            }
            if table.exclude_columns.contains(&key.column) {
                return Err(MigrateError::Config(format!(
                    "tables.{}: natural key column '{}' is also excluded",
                    table.name, key.column
                )));
            }
        }
    }

    Ok(())
}

fn validate_database(side: &str, db: &DatabaseConfig) -> Result<()> {
    validate_identifier(&db.schema)
        .map_err(|e| MigrateError::Config(format!("{}.schema: {}", side, e)))?;
    SslMode::parse(&db.ssl_mode)?;

    if let Some(ref url) = db.url {
        if url.trim().is_empty() {
            return Err(MigrateError::Config(format!("{}.url cannot be empty", side)));
        }
        return Ok(());
    }

    if db.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", side)));
    }
    if db.database.is_empty() {
        return Err(MigrateError::Config(format!("{}.database is required", side)));
    }
    if db.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", side)));
    }
    Ok(())
}
