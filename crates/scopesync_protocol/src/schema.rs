//! Replicated schema model.

use serde::{Deserialize, Serialize};

/// Runtime type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// UTF-8 text.
    Text,
    /// Boolean.
    Boolean,
    /// Raw bytes.
    Blob,
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncColumn {
    /// Column name.
    pub name: String,
    /// Column type.
    pub data_type: ColumnType,
}

impl SyncColumn {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A replicated table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTable {
    /// Table name.
    pub name: String,
    /// Columns in positional order; rows align with this order.
    pub columns: Vec<SyncColumn>,
    /// Name of the primary-key column.
    pub primary_key: String,
}

impl SyncTable {
    /// Creates a table definition.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<SyncColumn>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: primary_key.into(),
        }
    }

    /// Returns the positional index of the primary-key column.
    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.name == self.primary_key)
    }

    /// Returns the positional index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// The full replicated schema negotiated for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSchema {
    /// Replicated tables.
    pub tables: Vec<SyncTable>,
}

impl SyncSchema {
    /// Creates a schema from table definitions.
    pub fn new(tables: Vec<SyncTable>) -> Self {
        Self { tables }
    }

    /// Returns true if the schema declares at least one table.
    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    /// Looks up a table definition by name.
    pub fn table(&self, name: &str) -> Option<&SyncTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}
