//! Columnar in-memory row sets.
//!
//! A [`Frame`] keeps its columns in insertion order and its rows in the order
//! they were read. Nothing in this module ever re-sorts rows.

use crate::error::{IngestError, Result};
use crate::typemap::ColumnType;

use super::value::Value;

/// One named, typed column of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    pub name: String,
    pub dtype: ColumnType,
    pub values: Vec<Value>,
}

impl FrameColumn {
    pub fn new(name: impl Into<String>, dtype: ColumnType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    /// Number of null cells.
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }
}

/// Ordered collection of equal-length columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<FrameColumn>,
    len: usize,
}

impl Frame {
    /// Build a frame, checking that names are unique and lengths agree.
    pub fn from_columns(columns: Vec<FrameColumn>) -> Result<Self> {
        let len = columns.first().map(|c| c.values.len()).unwrap_or(0);
        let mut frame = Frame {
            columns: Vec::with_capacity(columns.len()),
            len,
        };
        for column in columns {
            frame.push_column(column)?;
        }
        Ok(frame)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn columns(&self) -> &[FrameColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&FrameColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with `ColumnNotFound`.
    pub fn require(&self, table: &str, name: &str) -> Result<&FrameColumn> {
        self.column(name)
            .ok_or_else(|| IngestError::ColumnNotFound(format!("{}.{}", table, name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn check_insertable(&self, column: &FrameColumn) -> Result<()> {
        if self.contains(&column.name) {
            return Err(IngestError::InvalidFrame(format!(
                "duplicate column '{}'",
                column.name
            )));
        }
        if !self.columns.is_empty() && column.values.len() != self.len {
            return Err(IngestError::InvalidFrame(format!(
                "column '{}' has {} values, frame has {} rows",
                column.name,
                column.values.len(),
                self.len
            )));
        }
        Ok(())
    }

    /// Append a column at the end.
    pub fn push_column(&mut self, column: FrameColumn) -> Result<()> {
        self.check_insertable(&column)?;
        if self.columns.is_empty() {
            self.len = column.values.len();
        }
        self.columns.push(column);
        Ok(())
    }

    /// Insert a column at `index` (clamped to the width).
    pub fn insert_column(&mut self, index: usize, column: FrameColumn) -> Result<()> {
        self.check_insertable(&column)?;
        if self.columns.is_empty() {
            self.len = column.values.len();
        }
        let index = index.min(self.columns.len());
        self.columns.insert(index, column);
        Ok(())
    }

    /// Replace a column in place, or append it when absent.
    pub fn set_column(&mut self, column: FrameColumn) -> Result<()> {
        match self.position(&column.name) {
            Some(idx) => {
                if column.values.len() != self.len {
                    return Err(IngestError::InvalidFrame(format!(
                        "column '{}' has {} values, frame has {} rows",
                        column.name,
                        column.values.len(),
                        self.len
                    )));
                }
                self.columns[idx] = column;
                Ok(())
            }
            None => self.push_column(column),
        }
    }

    /// Remove a column, returning it when present.
    pub fn remove_column(&mut self, name: &str) -> Option<FrameColumn> {
        let idx = self.position(name)?;
        Some(self.columns.remove(idx))
    }

    /// Cells of one row, in column order.
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.len {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[index]).collect())
    }
}
