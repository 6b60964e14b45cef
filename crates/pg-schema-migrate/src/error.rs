//! Error types for the migration engine.

use std::fmt;

use thiserror::Error;

/// Exit code for configuration errors (invalid YAML, missing fields, etc.).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when a database is unreachable at run start.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code when the run finished but recorded table or row failures.
pub const EXIT_INCOMPLETE: u8 = 3;
/// Exit code when the overall run deadline elapsed.
pub const EXIT_DEADLINE: u8 = 4;
/// Exit code when the run was cancelled by a signal.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for any other database or internal error.
pub const EXIT_OTHER: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Which side of the migration a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbSide {
    Source,
    Target,
}

impl fmt::Display for DbSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbSide::Source => f.write_str("source"),
            DbSide::Target => f.write_str("target"),
        }
    }
}

/// Every failure the migrator can surface, each mapped to a process exit code.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Unusable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source or target database unreachable. Aborts the whole run.
    #[error("Connection to {side} database failed: {message}")]
    Connection { side: DbSide, message: String },

    /// Pool checkout or construction failure, with the operation that needed it.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Query error reported by the PostgreSQL driver
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Drop, create, truncate or trigger statement failed for a table
    #[error("DDL failed for table {table}: {message}")]
    Ddl { table: String, message: String },

    /// A single row was rejected by the target
    #[error("Insert into {table} failed for {row}: {message}")]
    RowInsert {
        table: String,
        row: String,
        message: String,
    },

    /// The source scan of a table stopped before its last row
    #[error("Source scan of {table} failed: {message}")]
    SourceScan { table: String, message: String },

    /// A source value could not be decoded into a row value
    #[error("Cannot decode column {column}: {message}")]
    Decode { column: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file did not parse.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Report or plan could not be rendered.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stopped by signal or caller token.
    #[error("Migration cancelled")]
    Cancelled,

    /// The overall run deadline elapsed
    #[error("Run deadline exceeded")]
    DeadlineExceeded,

    /// The run finished but recorded failures
    #[error("Migration finished with failures: {tables}")]
    Incomplete { tables: String },
}

impl MigrateError {
    /// Pool error tagged with the operation that was running.
    pub fn pool(err: impl fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: err.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connection error for one side of the migration.
    pub fn connection(side: DbSide, err: impl fmt::Display) -> Self {
        MigrateError::Connection {
            side,
            message: err.to_string(),
        }
    }

    /// Create a DDL error for a table.
    pub fn ddl(table: impl fmt::Display, err: impl fmt::Display) -> Self {
        MigrateError::Ddl {
            table: table.to_string(),
            message: err.to_string(),
        }
    }

    /// Create a SourceScan error for a table.
    pub fn source_scan(table: impl fmt::Display, err: impl fmt::Display) -> Self {
        MigrateError::SourceScan {
            table: table.to_string(),
            message: err.to_string(),
        }
    }

    /// Create a Decode error for a column.
    pub fn decode(column: impl Into<String>, err: impl fmt::Display) -> Self {
        MigrateError::Decode {
            column: column.into(),
            message: err.to_string(),
        }
    }

    /// Whether the error only concerns the row being processed.
    ///
    /// Anything else seen while streaming a table ends that table's load:
    /// a lost session, pool exhaustion, or a source scan that broke off.
    pub fn is_row_level(&self) -> bool {
        match self {
            MigrateError::RowInsert { .. } | MigrateError::Decode { .. } => true,
            MigrateError::Database(e) => !e.is_closed(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::Incomplete { .. } => EXIT_INCOMPLETE,
            MigrateError::DeadlineExceeded => EXIT_DEADLINE,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            _ => EXIT_OTHER,
        }
    }

    /// Message followed by each `source()` in the chain, for stderr.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Crate-wide result.
pub type Result<T> = std::result::Result<T, MigrateError>;
