//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL source and target
//! - [`common`]: shared TLS setup

pub mod common;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use postgres::PgDatabase;
