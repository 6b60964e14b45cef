//! Row values moved from source to target.
//!
//! Values are decoded from the source by declared column type and bound on
//! the target as text with an explicit cast, so PostgreSQL applies its own
//! input conversion for the target column type.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// How a source column is decoded.
///
/// Types without a lossless client-side representation are selected as text
/// and carried as [`SqlValue::Opaque`]. Dates and times belong there too:
/// `infinity` and BC values have no chrono equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Text,
    Bytes,
    Uuid,
    Json,
    Opaque,
}

impl ValueKind {
    /// Map an `information_schema` data type to a decoding strategy.
    pub fn from_declared_type(declared_type: &str) -> Self {
        match declared_type {
            "boolean" => ValueKind::Bool,
            "smallint" => ValueKind::I16,
            "integer" => ValueKind::I32,
            "bigint" => ValueKind::I64,
            "real" => ValueKind::F32,
            "double precision" => ValueKind::F64,
            "text" | "character varying" | "character" | "name" => ValueKind::Text,
            "bytea" => ValueKind::Bytes,
            "uuid" => ValueKind::Uuid,
            "json" | "jsonb" => ValueKind::Json,
            _ => ValueKind::Opaque,
        }
    }

    /// Whether the source query must cast the column to text.
    pub fn selects_as_text(&self) -> bool {
        matches!(self, ValueKind::Opaque)
    }
}

/// A single nullable scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Json(serde_json::Value),
    /// Text rendering of a value with no native client type (numeric, enum,
    /// timestamp, geometric, array, interval, ...).
    Opaque(String),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text accepted by the PostgreSQL input function of the value's type,
    /// or `None` for NULL.
    #[must_use]
    pub fn to_param_text(&self) -> Option<String> {
        let text = match self {
            SqlValue::Null => return None,
            SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
            SqlValue::I16(n) => n.to_string(),
            SqlValue::I32(n) => n.to_string(),
            SqlValue::I64(n) => n.to_string(),
            SqlValue::F32(n) => float_text(f64::from(*n), n.to_string()),
            SqlValue::F64(n) => float_text(*n, n.to_string()),
            SqlValue::Text(s) | SqlValue::Opaque(s) => s.clone(),
            SqlValue::Bytes(b) => format!("\\x{}", hex::encode(b)),
            SqlValue::Uuid(u) => u.to_string(),
            SqlValue::Json(v) => v.to_string(),
        };
        Some(text)
    }
}

fn float_text(value: f64, rendered: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        rendered
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_param_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One source row: values in reconciled column order.
///
/// Column names are shared by every row of a table's stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Pair values with their column names. Lengths must match.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.position(column).map(|i| &self.values[i])
    }

    /// Replace a column's value, returning false if the column is absent.
    pub fn set(&mut self, column: &str, value: SqlValue) -> bool {
        match self.position(column) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }
}
