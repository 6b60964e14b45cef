//! Schema discovery and reconciliation.
//!
//! - [`introspect`]: ordered column lists from catalog metadata
//! - [`reconcile`]: the column set safe to move between two tables
//! - [`ddl`]: landing-table `CREATE TABLE` synthesis

pub mod ddl;
pub mod introspect;
pub mod reconcile;

pub use ddl::{landing_column, synthesize, CreateTable};
pub use introspect::introspect;
pub use reconcile::{reconcile, ColumnSummary, ReconciledColumn, ReconciledColumnSet};
