//! Staged change batches.

use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of a replicated row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowState {
    /// Row was inserted or updated.
    Modified,
    /// Row was deleted.
    Deleted,
}

/// A single replicated row.
///
/// Cells align positionally with the table's column order. Deleted
/// rows carry at least the primary-key cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRow {
    /// Row state.
    pub state: RowState,
    /// Cell values in column order.
    pub values: Vec<CellValue>,
}

impl SyncRow {
    /// Creates a modified (upserted) row.
    pub fn modified(values: Vec<CellValue>) -> Self {
        Self {
            state: RowState::Modified,
            values,
        }
    }

    /// Creates a deleted row.
    pub fn deleted(values: Vec<CellValue>) -> Self {
        Self {
            state: RowState::Deleted,
            values,
        }
    }
}

/// All selected rows for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    /// Table name.
    pub table_name: String,
    /// Selected rows.
    pub rows: Vec<SyncRow>,
}

impl TableChanges {
    /// Creates a table change set.
    pub fn new(table_name: impl Into<String>, rows: Vec<SyncRow>) -> Self {
        Self {
            table_name: table_name.into(),
            rows,
        }
    }
}

/// A staged set of change rows produced by one change selection.
///
/// The orchestrator treats the handle as opaque: it is produced by
/// `get_change_batch` on one peer and consumed by `apply_changes` on
/// the other. The handle stays referentially stable for the session;
/// providers that additionally stage rows to disk release those
/// artifacts in `end_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Unique batch identifier.
    pub id: Uuid,
    /// Per-table change sets.
    pub tables: Vec<TableChanges>,
}

impl BatchInfo {
    /// Creates a batch over the given table change sets.
    pub fn new(tables: Vec<TableChanges>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tables,
        }
    }

    /// Creates an empty batch.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Returns true if the batch stages no rows.
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.rows.is_empty())
    }

    /// Total number of staged rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}
