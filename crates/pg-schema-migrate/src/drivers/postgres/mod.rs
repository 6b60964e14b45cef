//! PostgreSQL driver.
//!
//! One [`PgDatabase`] wraps a deadpool pool for one side of the migration.
//! Catalog queries are shared; [`reader`] streams rows out of the source and
//! [`writer`] runs DDL and inserts on the target.

mod reader;
mod writer;

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::Config as PgConfig;
use tracing::{info, warn};

use crate::config::{DatabaseConfig, MigrationConfig};
use crate::core::schema::{ColumnSpec, TableDescriptor};
use crate::core::traits::Database;
use crate::drivers::common::{SslMode, TlsBuilder};
use crate::error::{DbSide, MigrateError, Result};
use crate::schema::introspect::{COLUMNS_QUERY, TABLE_EXISTS_QUERY};

pub use writer::PgRowSink;

const APPLICATION_NAME: &str = "pg-schema-migrate";

/// A pooled connection to one PostgreSQL database.
pub struct PgDatabase {
    side: DbSide,
    pool: Pool,
    statement_timeout: Option<Duration>,
}

impl PgDatabase {
    /// Build the pool and prove it can reach the server.
    pub async fn connect(
        side: DbSide,
        config: &DatabaseConfig,
        migration: &MigrationConfig,
    ) -> Result<Self> {
        let (pg_config, ssl_mode) = build_pg_config(config, migration)
            .map_err(|e| MigrateError::connection(side, e))?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let max_size = migration.workers + 1;

        let tls = TlsBuilder::new(ssl_mode).build()?;
        let pool = match tls {
            None => {
                warn!(
                    "{} TLS is disabled. Credentials will be transmitted in plaintext.",
                    side
                );
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr).max_size(max_size).build()
            }
            Some(connector) => {
                let mgr = Manager::from_config(pg_config, connector, mgr_config);
                Pool::builder(mgr).max_size(max_size).build()
            }
        }
        .map_err(|e| MigrateError::connection(side, e))?;

        let db = Self {
            side,
            pool,
            statement_timeout: migration.statement_timeout_secs.map(Duration::from_secs),
        };

        let client = db
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(side, e))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(side, e))?;

        info!("Connected to {} database: {}", side, config.describe());
        Ok(db)
    }

    /// Which side this database serves.
    pub fn side(&self) -> DbSide {
        self.side
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, format!("{} {}", context, self.side)))
    }

    async fn execute_ddl(&self, table: &TableDescriptor, sql: &str) -> Result<()> {
        let client = self.client("running DDL on").await?;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| MigrateError::ddl(table, e))
    }
}

/// Translate the config into driver settings and the effective TLS mode.
fn build_pg_config(
    config: &DatabaseConfig,
    migration: &MigrationConfig,
) -> Result<(PgConfig, SslMode)> {
    let mut ssl_mode = SslMode::parse(&config.ssl_mode)?;

    let mut pg_config = match config.url {
        Some(ref url) => {
            let parsed: PgConfig = url
                .parse()
                .map_err(|e| MigrateError::Config(format!("invalid connection url: {}", e)))?;
            if ssl_mode == SslMode::Disable
                && matches!(parsed.get_ssl_mode(), tokio_postgres::config::SslMode::Require)
            {
                ssl_mode = SslMode::Require;
            }
            parsed
        }
        None => {
            let mut pg_config = PgConfig::new();
            pg_config.host(&config.host);
            pg_config.port(config.port);
            pg_config.dbname(&config.database);
            pg_config.user(&config.user);
            if !config.password.is_empty() {
                pg_config.password(&config.password);
            }
            pg_config
        }
    };

    pg_config.ssl_mode(if ssl_mode.requires_tls() {
        tokio_postgres::config::SslMode::Require
    } else {
        tokio_postgres::config::SslMode::Disable
    });
    pg_config.application_name(APPLICATION_NAME);
    pg_config.connect_timeout(Duration::from_secs(migration.connect_timeout_secs));
    if let Some(secs) = migration.statement_timeout_secs {
        pg_config.options(&format!("-c statement_timeout={}s", secs));
    }

    Ok((pg_config, ssl_mode))
}

#[async_trait]
impl Database for PgDatabase {
    async fn ping(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(self.side, e))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(self.side, e))?;
        Ok(())
    }

    async fn table_exists(&self, table: &TableDescriptor) -> Result<bool> {
        let client = self.client("checking table existence on").await?;
        let row = client
            .query_one(TABLE_EXISTS_QUERY, &[&table.schema, &table.name])
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn table_columns(&self, table: &TableDescriptor) -> Result<Vec<ColumnSpec>> {
        let client = self.client("introspecting columns on").await?;
        let rows = client
            .query(COLUMNS_QUERY, &[&table.schema, &table.name])
            .await?;

        rows.iter()
            .map(|row| -> Result<ColumnSpec> {
                Ok(ColumnSpec {
                    name: row.try_get(0)?,
                    declared_type: row.try_get(1)?,
                    sql_type: row.try_get(2)?,
                    cast_type: row.try_get(3)?,
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close();
        info!("Closed {} connection pool", self.side);
    }
}
