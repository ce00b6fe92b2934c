//! Columnar measurement frame (spec §9 design note: "not tied to any
//! particular DataFrame library; the contract is just 'iterable of rows,
//! addressable by column name'").

use serde::{Deserialize, Serialize};

/// One column's values. A column is homogeneous; mixed-type acquisition
/// results land in separate columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ColumnValues {
    Numbers(Vec<Option<f64>>),
    Strings(Vec<Option<String>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Numbers(v) => v.len(),
            ColumnValues::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_null(&mut self) {
        match self {
            ColumnValues::Numbers(v) => v.push(None),
            ColumnValues::Strings(v) => v.push(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub unit: Option<String>,
    pub values: ColumnValues,
}

impl Column {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A columnar table: the common output shape for waveforms, sweeps, and
/// concurrent-mode acquisition ticks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub columns: Vec<Column>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Ensure a numeric column named `name` exists, appending a fresh
    /// all-null column (back-filled to the current row count) if absent.
    pub fn ensure_numeric_column(&mut self, name: &str, unit: Option<String>) -> usize {
        if let Some(idx) = self.columns.iter().position(|c| c.name == name) {
            return idx;
        }
        let row_count = self.row_count();
        self.columns.push(Column {
            name: name.to_string(),
            unit,
            values: ColumnValues::Numbers(vec![None; row_count]),
        });
        self.columns.len() - 1
    }

    pub fn ensure_string_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.columns.iter().position(|c| c.name == name) {
            return idx;
        }
        let row_count = self.row_count();
        self.columns.push(Column {
            name: name.to_string(),
            unit: None,
            values: ColumnValues::Strings(vec![None; row_count]),
        });
        self.columns.len() - 1
    }

    /// Pad every existing column with a trailing null, used to keep all
    /// columns the same length when a row supplies only a subset of keys.
    pub fn pad_row(&mut self) {
        for column in &mut self.columns {
            column.values.push_null();
        }
    }

    pub fn set_numeric(&mut self, column_idx: usize, row: usize, value: f64) {
        if let ColumnValues::Numbers(values) = &mut self.columns[column_idx].values {
            values[row] = Some(value);
        }
    }

    pub fn set_string(&mut self, column_idx: usize, row: usize, value: String) {
        if let ColumnValues::Strings(values) = &mut self.columns[column_idx].values {
            values[row] = Some(value);
        }
    }
}
