//! Result-set rows and column metadata.

use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Metadata for one result column, as described by a RowDescription message.
///
/// `size`, `precision` and `scale` are only meaningful for some type OIDs
/// (varchar carries a maximum length, numeric carries precision and scale);
/// otherwise they hold `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub type_oid: u32,
    pub size: i32,
    pub precision: i32,
    pub scale: i32,
}

impl ColumnDescription {
    /// A column with no size/precision/scale information.
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
            size: -1,
            precision: -1,
            scale: -1,
        }
    }
}

/// Column metadata shared across all rows in a result set.
///
/// Wrapped in `Arc` so every row of a result points at one copy.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    columns: Vec<ColumnDescription>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a RowDescription.
    pub fn new(columns: Vec<ColumnDescription>) -> Self {
        let mut name_to_index = HashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            // First occurrence wins for duplicate names (e.g. `SELECT 1, 1`).
            name_to_index.entry(column.name.clone()).or_insert(i);
        }
        Self {
            columns,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get a column description by index.
    pub fn get(&self, index: usize) -> Option<&ColumnDescription> {
        self.columns.get(index)
    }

    /// All column descriptions, in order.
    pub fn descriptions(&self) -> &[ColumnDescription] {
        &self.columns
    }
}

/// A single row returned from a query.
///
/// Always holds exactly one value per column of its result set.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a row sharing the result set's column metadata.
    ///
    /// Returns `None` when the value count does not match the column count.
    pub fn new(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Option<Self> {
        if values.len() != columns.len() {
            return None;
        }
        Some(Self { values, columns })
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Iterate over all values.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .descriptions()
            .iter()
            .map(|c| c.name.as_str())
            .zip(self.values.iter())
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}
