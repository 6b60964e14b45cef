//! Core abstractions shared by the schema, transfer and orchestration layers.
//!
//! - [`identifier`]: quoting and validation for dynamically built SQL
//! - [`schema`]: table and column metadata
//! - [`value`]: row values and their text encoding
//! - [`traits`]: the database seams implemented by drivers

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnSpec, TableDescriptor, TriggerMode};
pub use traits::{Database, RowSink, SourceDatabase, TargetDatabase};
pub use value::{Row, SqlValue, ValueKind};
