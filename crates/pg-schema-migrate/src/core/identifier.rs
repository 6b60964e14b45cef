//! Identifier validation and quoting for dynamically built SQL.
//!
//! Table, column and schema names come from catalog metadata and from the
//! configuration file, and cannot be bound as statement parameters. Every
//! identifier that reaches SQL text goes through [`quote_pg`]; type names
//! taken from `format_type()` go through [`validate_type_name`].

use crate::error::{MigrateError, Result};

/// NAMEDATALEN - 1. Longer names are silently truncated by the server, which
/// could make two configured tables collide.
const PG_NAME_BYTES: usize = 63;

/// Markers that would let spliced text end the statement or comment it out.
const TYPE_NAME_HAZARDS: [&str; 4] = [";", "--", "/*", "\0"];

fn rejected(kind: &str, name: &str, reason: impl std::fmt::Display) -> MigrateError {
    MigrateError::Config(format!("{} {:?} rejected: {}", kind, name, reason))
}

/// Check that `name` can be used as a PostgreSQL identifier as written.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(rejected("identifier", name, "empty name"));
    }
    if name.contains('\0') {
        return Err(rejected("identifier", name, "contains a null byte"));
    }
    if name.len() > PG_NAME_BYTES {
        return Err(rejected(
            "identifier",
            name,
            format!("{} bytes, longer than the {}-byte name limit", name.len(), PG_NAME_BYTES),
        ));
    }
    Ok(())
}

/// Render `name` as a delimited identifier, doubling embedded quotes.
///
/// ```
/// use pg_schema_migrate::core::identifier::quote_pg;
/// assert_eq!(quote_pg("station").unwrap(), "\"station\"");
/// assert_eq!(quote_pg("kW \"peak\"").unwrap(), "\"kW \"\"peak\"\"\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for ch in name.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    Ok(quoted)
}

/// `"schema"."table"`.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    let schema = quote_pg(schema)?;
    let table = quote_pg(table)?;
    Ok(schema + "." + &table)
}

/// Check a type name reported by the catalog before splicing it into DDL
/// or a cast.
///
/// `format_type()` output is already quoted where needed, so it is used as
/// is; this only rejects text that could end the statement or hide the rest
/// of it.
pub fn validate_type_name(type_name: &str) -> Result<()> {
    if type_name.trim().is_empty() {
        return Err(rejected("type name", type_name, "empty name"));
    }
    if let Some(hazard) = TYPE_NAME_HAZARDS.iter().find(|h| type_name.contains(*h)) {
        return Err(rejected(
            "type name",
            type_name,
            format!("contains {:?}", hazard),
        ));
    }
    Ok(())
}
