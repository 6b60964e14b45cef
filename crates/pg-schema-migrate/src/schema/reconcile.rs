//! Column reconciliation between two independently evolved tables.

use std::collections::HashSet;

use serde::Serialize;

use crate::core::schema::ColumnSpec;

/// A column present on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledColumn {
    pub source: ColumnSpec,
    pub target: ColumnSpec,
}

impl ReconciledColumn {
    pub fn name(&self) -> &str {
        &self.source.name
    }
}

/// Columns to move for one table, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciledColumnSet {
    columns: Vec<ReconciledColumn>,
    /// Source columns dropped by the deny-list.
    pub excluded: Vec<String>,
    /// Source columns with no target counterpart.
    pub source_only: Vec<String>,
    /// Target columns no source column feeds; they stay NULL or default.
    pub target_only: Vec<String>,
}

impl ReconciledColumnSet {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ReconciledColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name() == name)
    }

    /// Source-side specs, used to read and decode rows.
    pub fn source_columns(&self) -> Vec<ColumnSpec> {
        self.columns.iter().map(|c| c.source.clone()).collect()
    }

    /// Target-side specs, used to bind and cast values.
    pub fn target_columns(&self) -> Vec<ColumnSpec> {
        self.columns.iter().map(|c| c.target.clone()).collect()
    }

    /// Summary for plans and reports.
    pub fn summary(&self) -> ColumnSummary {
        ColumnSummary {
            moved: self.names(),
            excluded: self.excluded.clone(),
            source_only: self.source_only.clone(),
            target_only: self.target_only.clone(),
        }
    }
}

/// Serializable view of a reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnSummary {
    pub moved: Vec<String>,
    pub excluded: Vec<String>,
    pub source_only: Vec<String>,
    pub target_only: Vec<String>,
}

/// Intersect source and target columns by exact name, minus `deny`.
///
/// The result keeps the source's column order so values bind positionally
/// in a stable order.
pub fn reconcile(
    source: &[ColumnSpec],
    target: &[ColumnSpec],
    deny: &[String],
) -> ReconciledColumnSet {
    let deny: HashSet<&str> = deny.iter().map(String::as_str).collect();
    let mut set = ReconciledColumnSet::default();

    for column in source {
        if deny.contains(column.name.as_str()) {
            set.excluded.push(column.name.clone());
            continue;
        }
        match target.iter().find(|t| t.name == column.name) {
            Some(target_column) => set.columns.push(ReconciledColumn {
                source: column.clone(),
                target: target_column.clone(),
            }),
            None => set.source_only.push(column.name.clone()),
        }
    }

    let source_names: HashSet<&str> = source.iter().map(|c| c.name.as_str()).collect();
    set.target_only = target
        .iter()
        .filter(|t| !source_names.contains(t.name.as_str()))
        .map(|t| t.name.clone())
        .collect();

    set
}
