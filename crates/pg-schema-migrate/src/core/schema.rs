//! Table and column metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::identifier::qualify_pg;
use crate::error::Result;

/// `information_schema.columns.data_type` value for enums, composites and
/// extension types.
pub const USER_DEFINED: &str = "USER-DEFINED";

/// Reported instead of `ARRAY` when the array's element type is not built in.
pub const USER_DEFINED_ARRAY: &str = "USER-DEFINED[]";

/// Identifies a table in either database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema qualifier.
    pub schema: String,

    /// Table name.
    pub name: String,
}

impl TableDescriptor {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Quoted `"schema"."table"` for SQL text.
    pub fn qualified(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.name)
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Firing mode of a trigger, as `pg_trigger.tgenabled` records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// `O`: fires unless `session_replication_role` is `replica`.
    Origin,
    /// `A`: fires in every replication role.
    Always,
    /// `R`: fires only in the `replica` role.
    Replica,
    /// `D`
    Disabled,
}

impl TriggerMode {
    pub fn from_pg_code(code: &str) -> Option<Self> {
        match code {
            "O" => Some(TriggerMode::Origin),
            "A" => Some(TriggerMode::Always),
            "R" => Some(TriggerMode::Replica),
            "D" => Some(TriggerMode::Disabled),
            _ => None,
        }
    }

    /// `ALTER TABLE` action that puts a trigger in this mode.
    pub fn alter_action(&self) -> &'static str {
        match self {
            TriggerMode::Origin => "ENABLE",
            TriggerMode::Always => "ENABLE ALWAYS",
            TriggerMode::Replica => "ENABLE REPLICA",
            TriggerMode::Disabled => "DISABLE",
        }
    }
}

/// One column as reported by catalog metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,

    /// `information_schema` data type, e.g. "integer", "character varying",
    /// "USER-DEFINED", "ARRAY".
    pub declared_type: String,

    /// Full type with modifiers as `format_type()` renders it, resolved
    /// through domains to the base type, e.g. "character varying(255)".
    pub sql_type: String,

    /// Type without modifiers, used to cast bound values,
    /// e.g. "character varying".
    pub cast_type: String,
}

impl ColumnSpec {
    /// Column whose catalog type strings are all the same, for built-in types.
    pub fn simple(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            declared_type: data_type.clone(),
            sql_type: data_type.clone(),
            cast_type: data_type,
        }
    }

    /// Whether the catalog reports a type the target schema does not carry.
    pub fn is_user_defined(&self) -> bool {
        self.declared_type == USER_DEFINED || self.declared_type == USER_DEFINED_ARRAY
    }
}
