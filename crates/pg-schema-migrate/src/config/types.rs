//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Parsed migration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source (legacy) database.
    pub source: DatabaseConfig,

    /// Target (redesigned) database.
    pub target: DatabaseConfig,

    /// Run-wide behavior.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Tables to migrate, in declared dependency order.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// Connection settings for one PostgreSQL database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// libpq-style connection string (`postgres://...` or `host=... dbname=...`).
    /// Takes precedence over the discrete fields below.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password. Never serialized.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Schema qualifier for every table on this side (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl DatabaseConfig {
    /// Build a config from a connection string, keeping defaults elsewhere.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            host: String::new(),
            port: default_pg_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            schema: default_public_schema(),
            ssl_mode: default_disable(),
        }
    }

    /// Short description for logs, without credentials.
    pub fn describe(&self) -> String {
        if self.url.is_some() {
            "<connection url>".to_string()
        } else {
            format!("{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

/// Run-wide migration behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Tables of equal rank migrated concurrently (default: 1, sequential).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Rows buffered between the source cursor and the target inserts.
    #[serde(default = "default_read_ahead_rows")]
    pub read_ahead_rows: usize,

    /// Per-statement timeout applied to every session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_timeout_secs: Option<u64>,

    /// Connection establishment timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Overall deadline for the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    /// Create the target schema before resetting tables (default: true).
    #[serde(default = "default_true")]
    pub create_target_schema: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            read_ahead_rows: default_read_ahead_rows(),
            statement_timeout_secs: None,
            connect_timeout_secs: default_connect_timeout(),
            run_timeout_secs: None,
            create_target_schema: true,
        }
    }
}

/// How the target table is prepared before loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Drop the target table (cascading) and re-create it from source metadata.
    #[default]
    Reset,

    /// Empty the existing target table and restart its identities.
    Truncate,

    /// Load into the existing target table as is.
    Append,
}

/// Per-table overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name in the source schema.
    pub name: String,

    /// Table name in the target schema, when it differs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,

    /// Source columns that must never be moved, even if the target has them.
    #[serde(default)]
    pub exclude_columns: Vec<String>,

    /// Target preparation mode.
    #[serde(default)]
    pub mode: LoadMode,

    /// Dependency rank: referenced tables get lower ranks than referencing ones.
    #[serde(default)]
    pub rank: i32,

    /// Natural key whose duplicates are rewritten instead of rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<NaturalKeyConfig>,

    /// Column used to identify rows in failure messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id_column: Option<String>,

    /// Whether row failures in this table fail the run (default: true).
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl TableConfig {
    /// Config for a table with every option at its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_name: None,
            exclude_columns: Vec::new(),
            mode: LoadMode::default(),
            rank: 0,
            natural_key: None,
            row_id_column: None,
            strict: true,
        }
    }

    /// Effective target table name.
    pub fn target_table(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.name)
    }
}

/// Natural-key deduplication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaturalKeyConfig {
    /// Column holding the business identifier.
    pub column: String,

    /// Suffix appended to repeated keys (default: "_duplicate").
    #[serde(default = "default_duplicate_suffix")]
    pub suffix: String,

    /// Let NULL keys through untouched instead of treating them as a value.
    #[serde(default)]
    pub skip_null: bool,
}

impl NaturalKeyConfig {
    /// Settings for a key column with the default suffix.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            suffix: default_duplicate_suffix(),
            skip_null: false,
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_read_ahead_rows() -> usize {
    1_000
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_duplicate_suffix() -> String {
    "_duplicate".to_string()
}

fn default_true() -> bool {
    true
}
