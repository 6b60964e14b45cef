//! Source row streaming.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use futures::{pin_mut, StreamExt};
use tokio::sync::mpsc;
use tokio_postgres::types::FromSql;
use tracing::debug;

use super::PgDatabase;
use crate::core::identifier::{quote_pg, validate_type_name};
use crate::core::schema::{ColumnSpec, TableDescriptor};
use crate::core::traits::SourceDatabase;
use crate::core::value::{Row, SqlValue, ValueKind};
use crate::error::{MigrateError, Result};

#[async_trait]
impl SourceDatabase for PgDatabase {
    fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[ColumnSpec],
        capacity: usize,
    ) -> mpsc::Receiver<Result<Row>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pool = self.pool.clone();
        let exempt_from_timeout = self.statement_timeout.is_some();
        let kinds: Vec<ValueKind> = columns
            .iter()
            .map(|c| ValueKind::from_declared_type(&c.declared_type))
            .collect();
        let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();
        let query = build_select(table, columns);
        let table = table.clone();

        tokio::spawn(async move {
            let result = match query {
                Ok(sql) => {
                    stream_rows(pool, sql, exempt_from_timeout, kinds, names, tx.clone()).await
                }
                Err(e) => Err(e),
            };
            // Only decode failures travel as row errors; anything that ends
            // the scan early is reported against the table.
            if let Err(e) = result {
                let _ = tx.send(Err(MigrateError::source_scan(&table, e))).await;
            }
        });

        rx
    }
}

/// Type each column is selected as.
///
/// Native kinds are cast to their plain type so domains over them decode
/// like the base type. `character` is widened to `bpchar` to keep the
/// value's padding and length.
fn select_type<'a>(column: &'a ColumnSpec, kind: ValueKind) -> &'a str {
    match kind {
        ValueKind::Opaque => "text",
        ValueKind::Text if column.declared_type == "character" => "bpchar",
        _ => &column.declared_type,
    }
}

/// `SELECT` projecting `columns` from `table`, in order.
pub(crate) fn build_select(table: &TableDescriptor, columns: &[ColumnSpec]) -> Result<String> {
    let mut projection = Vec::with_capacity(columns.len());
    for column in columns {
        let kind = ValueKind::from_declared_type(&column.declared_type);
        let cast = select_type(column, kind);
        validate_type_name(cast)?;
        projection.push(format!("{}::{}", quote_pg(&column.name)?, cast));
    }
    Ok(format!(
        "SELECT {} FROM {}",
        projection.join(", "),
        table.qualified()?
    ))
}

/// Run the scan in a read-only transaction and forward decoded rows.
///
/// The scan lasts as long as the consumer takes to insert every row, so it
/// is exempt from the session's statement timeout. Temporal columns arrive
/// as text, so the output style is pinned to ISO, which the target parses
/// under any `DateStyle`.
async fn stream_rows(
    pool: Pool,
    sql: String,
    exempt_from_timeout: bool,
    kinds: Vec<ValueKind>,
    names: Arc<[String]>,
    tx: mpsc::Sender<Result<Row>>,
) -> Result<()> {
    let mut client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, "getting source connection for row scan"))?;
    let transaction = client.build_transaction().read_only(true).start().await?;
    transaction
        .batch_execute("SET LOCAL DateStyle = 'ISO, YMD'")
        .await?;
    if exempt_from_timeout {
        transaction
            .batch_execute("SET LOCAL statement_timeout = 0")
            .await?;
    }

    debug!("Source scan: {}", sql);
    let mut sent = 0u64;
    {
        let stream = transaction
            .query_raw(sql.as_str(), Vec::<String>::new())
            .await?;
        pin_mut!(stream);

        while let Some(next) = stream.next().await {
            let pg_row = next?;
            let row = decode_row(&pg_row, &kinds, &names);
            if tx.send(row).await.is_err() {
                debug!("Row consumer went away after {} rows", sent);
                return Ok(());
            }
            sent += 1;
        }
    }

    transaction.commit().await?;
    debug!("Source scan finished: {} rows", sent);
    Ok(())
}

fn decode_row(
    pg_row: &tokio_postgres::Row,
    kinds: &[ValueKind],
    names: &Arc<[String]>,
) -> Result<Row> {
    let mut values = Vec::with_capacity(kinds.len());
    for (idx, kind) in kinds.iter().enumerate() {
        let value = decode_value(pg_row, idx, *kind)
            .map_err(|e| MigrateError::decode(names[idx].clone(), e))?;
        values.push(value);
    }
    Ok(Row::new(Arc::clone(names), values))
}

fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    kind: ValueKind,
) -> std::result::Result<SqlValue, tokio_postgres::Error> {
    Ok(match kind {
        ValueKind::Bool => get(row, idx, SqlValue::Bool)?,
        ValueKind::I16 => get(row, idx, SqlValue::I16)?,
        ValueKind::I32 => get(row, idx, SqlValue::I32)?,
        ValueKind::I64 => get(row, idx, SqlValue::I64)?,
        ValueKind::F32 => get(row, idx, SqlValue::F32)?,
        ValueKind::F64 => get(row, idx, SqlValue::F64)?,
        ValueKind::Text => get(row, idx, SqlValue::Text)?,
        ValueKind::Bytes => get(row, idx, SqlValue::Bytes)?,
        ValueKind::Uuid => get(row, idx, SqlValue::Uuid)?,
        ValueKind::Json => get(row, idx, SqlValue::Json)?,
        ValueKind::Opaque => get(row, idx, SqlValue::Opaque)?,
    })
}

fn get<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    wrap: fn(T) -> SqlValue,
) -> std::result::Result<SqlValue, tokio_postgres::Error> {
    Ok(row
        .try_get::<_, Option<T>>(idx)?
        .map(wrap)
        .unwrap_or(SqlValue::Null))
}
