//! Catalog introspection.

use tracing::debug;

use crate::core::schema::{ColumnSpec, TableDescriptor};
use crate::core::traits::Database;
use crate::error::Result;

/// Table existence, answered from `information_schema.tables`.
pub const TABLE_EXISTS_QUERY: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM information_schema.tables
        WHERE table_schema = $1 AND table_name = $2
    )
"#;

/// Ordered columns of a table.
///
/// `information_schema` supplies the declared type; arrays whose element
/// type is not built in are reported as `USER-DEFINED[]`. The full and
/// unmodified type names come from `format_type()`, resolved through domains
/// to the base type.
pub const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name::text,
        CASE
            WHEN c.data_type = 'ARRAY' AND et.typnamespace <> 'pg_catalog'::regnamespace
                THEN 'USER-DEFINED[]'
            ELSE c.data_type::text
        END,
        format_type(
            COALESCE(NULLIF(t.typbasetype, 0), a.atttypid),
            CASE WHEN t.typbasetype <> 0 THEN t.typtypmod ELSE a.atttypmod END
        ),
        format_type(COALESCE(NULLIF(t.typbasetype, 0), a.atttypid), NULL)
    FROM information_schema.columns c
    JOIN pg_catalog.pg_namespace n ON n.nspname = c.table_schema
    JOIN pg_catalog.pg_class cl ON cl.relnamespace = n.oid AND cl.relname = c.table_name
    JOIN pg_catalog.pg_attribute a ON a.attrelid = cl.oid AND a.attname = c.column_name
    JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
    LEFT JOIN pg_catalog.pg_type et ON et.oid = t.typelem AND t.typcategory = 'A'
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

/// Ordered column list of `table`, empty when the table does not exist.
pub async fn introspect<D>(db: &D, table: &TableDescriptor) -> Result<Vec<ColumnSpec>>
where
    D: Database + ?Sized,
{
    let columns = db.table_columns(table).await?;
    if columns.is_empty() {
        debug!("{}: no columns in catalog", table);
    } else {
        debug!(
            "{}: {} columns ({})",
            table,
            columns.len(),
            columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.declared_type))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDatabase;

    #[tokio::test]
    async fn test_introspect_returns_ordered_columns() {
        let db = MemoryDatabase::new();
        let station = TableDescriptor::new("public", "station");
        db.add_table(
            &station,
            vec![
                ColumnSpec::simple("id", "integer"),
                ColumnSpec::simple("name", "text"),
                ColumnSpec::simple("opened_at", "timestamp without time zone"),
            ],
        );

        let columns = introspect(&db, &station).await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "opened_at"]);
    }

    #[tokio::test]
    async fn test_introspect_absent_table_is_empty() {
        let db = MemoryDatabase::new();
        let columns = introspect(&db, &TableDescriptor::new("public", "ghost"))
            .await
            .unwrap();
        assert!(columns.is_empty());
    }
}
