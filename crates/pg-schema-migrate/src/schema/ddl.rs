//! Landing-table DDL synthesis.
//!
//! The synthesized table mirrors the source's column names and types, with
//! every column nullable and no defaults, constraints or indexes. Enum,
//! composite and extension types are not carried to the target schema and
//! land as `text` (or `text[]` for arrays of them).

use std::collections::HashSet;

use crate::core::identifier::{quote_pg, validate_type_name};
use crate::core::schema::{ColumnSpec, TableDescriptor, USER_DEFINED, USER_DEFINED_ARRAY};
use crate::error::{MigrateError, Result};

/// A `CREATE TABLE` statement and the columns it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    /// Table being created.
    pub table: TableDescriptor,

    /// Landing columns, typed as the target will report them.
    pub columns: Vec<ColumnSpec>,

    /// Statement text.
    pub sql: String,
}

/// Map a source column to its landing-table column.
pub fn landing_column(source: &ColumnSpec) -> ColumnSpec {
    match source.declared_type.as_str() {
        USER_DEFINED => ColumnSpec::simple(&source.name, "text"),
        USER_DEFINED_ARRAY => ColumnSpec {
            name: source.name.clone(),
            declared_type: "ARRAY".to_string(),
            sql_type: "text[]".to_string(),
            cast_type: "text[]".to_string(),
        },
        _ => source.clone(),
    }
}

/// Build the landing table for `table` from the source's columns, leaving
/// out any column named in `exclude`.
///
/// Fails when no column is left, so a table that does not exist in the
/// source never produces DDL.
pub fn synthesize(
    table: &TableDescriptor,
    source_columns: &[ColumnSpec],
    exclude: &[String],
) -> Result<CreateTable> {
    let exclude: HashSet<&str> = exclude.iter().map(String::as_str).collect();
    let columns: Vec<ColumnSpec> = source_columns
        .iter()
        .filter(|c| !exclude.contains(c.name.as_str()))
        .map(landing_column)
        .collect();

    if columns.is_empty() {
        return Err(MigrateError::ddl(
            table,
            "cannot synthesize a table without columns",
        ));
    }

    let mut definitions = Vec::with_capacity(columns.len());
    for column in &columns {
        validate_type_name(&column.sql_type)?;
        definitions.push(format!("    {} {} NULL", quote_pg(&column.name)?, column.sql_type));
    }

    let sql = format!(
        "CREATE TABLE {} (\n{}\n)",
        table.qualified()?,
        definitions.join(",\n")
    );

    Ok(CreateTable {
        table: table.clone(),
        columns,
        sql,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, declared: &str, sql: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            declared_type: declared.to_string(),
            sql_type: sql.to_string(),
            cast_type: declared.to_string(),
        }
    }

    #[test]
    fn test_synthesize_every_column_nullable() {
        let table = TableDescriptor::new("asset_db", "station");
        let source = vec![
            ColumnSpec::simple("id", "integer"),
            column("name", "character varying", "character varying(120)"),
            column("capacity", "numeric", "numeric(10,2)"),
        ];
        let ddl = synthesize(&table, &source, &[]).unwrap();
        assert_eq!(
            ddl.sql,
            "CREATE TABLE \"asset_db\".\"station\" (\n    \"id\" integer NULL,\n    \
             \"name\" character varying(120) NULL,\n    \"capacity\" numeric(10,2) NULL\n)"
        );
        assert_eq!(ddl.columns.len(), 3);
    }

    #[test]
    fn test_user_defined_types_become_text() {
        let table = TableDescriptor::new("public", "chargers");
        let source = vec![
            column("status", USER_DEFINED, "charger_status"),
            column("tags", USER_DEFINED_ARRAY, "charger_tag[]"),
            column("ports", "ARRAY", "integer[]"),
        ];
        let ddl = synthesize(&table, &source, &[]).unwrap();
        assert!(ddl.sql.contains("\"status\" text NULL"));
        assert!(ddl.sql.contains("\"tags\" text[] NULL"));
        assert!(ddl.sql.contains("\"ports\" integer[] NULL"));
        assert!(!ddl.sql.contains("charger_status"));
        assert_eq!(ddl.columns[0].cast_type, "text");
        assert_eq!(ddl.columns[1].cast_type, "text[]");
    }

    #[test]
    fn test_no_constraints_or_defaults() {
        let table = TableDescriptor::new("public", "station");
        let ddl = synthesize(&table, &[ColumnSpec::simple("id", "bigint")], &[]).unwrap();
        let upper = ddl.sql.to_uppercase();
        assert!(!upper.contains("NOT NULL"));
        assert!(!upper.contains("PRIMARY KEY"));
        assert!(!upper.contains("DEFAULT"));
    }

    #[test]
    fn test_excluded_columns_left_out() {
        let table = TableDescriptor::new("public", "master_chargers");
        let source = vec![
            ColumnSpec::simple("charger_id", "integer"),
            ColumnSpec::simple("preventive_maintenance", "boolean"),
        ];
        let ddl = synthesize(&table, &source, &["preventive_maintenance".to_string()]).unwrap();
        assert!(!ddl.sql.contains("preventive_maintenance"));
        assert_eq!(ddl.columns.len(), 1);
    }

    #[test]
    fn test_zero_columns_refused() {
        let table = TableDescriptor::new("public", "ghost");
        let err = synthesize(&table, &[], &[]).unwrap_err();
        assert!(matches!(err, MigrateError::Ddl { .. }));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        let table = TableDescriptor::new("public", "odd\"table");
        let ddl = synthesize(&table, &[ColumnSpec::simple("we\"ird", "text")], &[]).unwrap();
        assert!(ddl.sql.starts_with("CREATE TABLE \"public\".\"odd\"\"table\""));
        assert!(ddl.sql.contains("\"we\"\"ird\" text NULL"));
    }

    #[test]
    fn test_hostile_type_name_rejected() {
        let table = TableDescriptor::new("public", "station");
        let source = vec![column("x", "integer", "integer); DROP TABLE station; --")];
        assert!(synthesize(&table, &source, &[]).is_err());
    }
}
