//! Change selection and apply summaries.

use serde::{Deserialize, Serialize};

/// Selection counts for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChangesSelected {
    /// Table name.
    pub table_name: String,
    /// Inserted or updated rows selected.
    pub upserts: u64,
    /// Deleted rows selected.
    pub deletes: u64,
}

impl TableChangesSelected {
    /// Total rows selected for this table.
    pub fn total(&self) -> u64 {
        self.upserts + self.deletes
    }
}

/// Summary of one change-selection call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseChangesSelected {
    /// Per-table selection counts.
    pub tables: Vec<TableChangesSelected>,
}

impl DatabaseChangesSelected {
    /// Total rows selected across all tables.
    pub fn total_changes_selected(&self) -> u64 {
        self.tables.iter().map(TableChangesSelected::total).sum()
    }
}

/// Apply counts for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChangesApplied {
    /// Table name.
    pub table_name: String,
    /// Rows applied.
    pub applied: u64,
    /// Rows that failed to apply.
    pub failed: u64,
    /// Conflicts resolved while applying.
    pub resolved_conflicts: u64,
}

/// Summary of one apply call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseChangesApplied {
    /// Per-table apply counts.
    pub tables: Vec<TableChangesApplied>,
}

impl DatabaseChangesApplied {
    /// Total rows applied across all tables.
    pub fn total_applied_changes(&self) -> u64 {
        self.tables.iter().map(|t| t.applied).sum()
    }

    /// Total rows that failed to apply.
    pub fn total_applied_changes_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }

    /// Total conflicts resolved during this apply.
    pub fn total_resolved_conflicts(&self) -> u64 {
        self.tables.iter().map(|t| t.resolved_conflicts).sum()
    }
}
