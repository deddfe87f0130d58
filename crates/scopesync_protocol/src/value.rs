//! Dynamic cell values.

use crate::schema::ColumnType;
use serde::{Deserialize, Serialize};

/// A dynamically typed table cell.
///
/// Rows travel between peers positionally, so a cell carries its own
/// runtime type rather than relying on the receiving schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// Absent value.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Boolean.
    Boolean(bool),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl CellValue {
    /// Returns the integer value, if this is an integer cell.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CellValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value, if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true if this cell is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Returns true if the cell's runtime type matches a column type.
    ///
    /// `Null` matches every column type.
    pub fn matches_type(&self, column_type: ColumnType) -> bool {
        match (self, column_type) {
            (CellValue::Null, _) => true,
            (CellValue::Integer(_), ColumnType::Integer) => true,
            (CellValue::Real(_), ColumnType::Real) => true,
            (CellValue::Text(_), ColumnType::Text) => true,
            (CellValue::Boolean(_), ColumnType::Boolean) => true,
            (CellValue::Blob(_), ColumnType::Blob) => true,
            _ => false,
        }
    }

    /// Renders the cell as a stable key fragment.
    ///
    /// Used by providers to key rows by primary-key cell. Distinct
    /// values must render distinctly within one column type.
    pub fn to_key(&self) -> String {
        match self {
            CellValue::Null => "null".into(),
            CellValue::Integer(v) => format!("i:{v}"),
            CellValue::Real(v) => format!("r:{v}"),
            CellValue::Text(v) => format!("t:{v}"),
            CellValue::Boolean(v) => format!("b:{v}"),
            CellValue::Blob(v) => {
                let mut key = String::with_capacity(2 + v.len() * 2);
                key.push_str("x:");
                for byte in v {
                    key.push_str(&format!("{byte:02x}"));
                }
                key
            }
        }
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}
