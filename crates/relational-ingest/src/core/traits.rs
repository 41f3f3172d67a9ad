//! Source abstraction used by the inspector and materializer.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{ColumnDef, ForeignKeyDef, PrimaryKeyDef};
use super::value::Value;

/// Rows returned by one bulk table read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRows {
    /// One entry per row, one value per requested column.
    pub rows: Vec<Vec<Value>>,
    /// Per column, the non-NULL cells the driver could not decode and
    /// returned as NULL. Columns without failures are absent.
    pub undecoded: BTreeMap<String, usize>,
}

impl TableRows {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            undecoded: BTreeMap::new(),
        }
    }

    /// Attach per-column failure counts, positional with `columns`.
    pub fn with_failures(mut self, columns: &[ColumnDef], failures: &[usize]) -> Self {
        self.undecoded = columns
            .iter()
            .zip(failures)
            .filter(|(_, &n)| n > 0)
            .map(|(c, &n)| (c.name.clone(), n))
            .collect();
        self
    }
}

/// Read-only access to a relational source.
///
/// Catalog methods must only touch metadata. `read_table` is the single
/// data-scanning operation and performs one bulk read of the whole table.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Names of all base tables visible in the database.
    async fn table_names(&self) -> Result<Vec<String>>;

    /// Column definitions in ordinal order.
    ///
    /// Fails with `TableNotFound` when the table is not visible.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>>;

    /// Primary key, or `None` when the table declares none.
    async fn primary_key(&self, table: &str) -> Result<Option<PrimaryKeyDef>>;

    /// Foreign key constraints with column lists in constraint order.
    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>>;

    /// Read every row of a table.
    ///
    /// Each row holds one value per entry of `columns`, in the same order.
    /// Rows come back in the order the source returns them. A cell that
    /// cannot be decoded is returned as NULL and counted in
    /// [`TableRows::undecoded`].
    async fn read_table(&self, table: &str, columns: &[ColumnDef]) -> Result<TableRows>;

    /// Get the database type name (e.g. "mysql", "postgres").
    fn db_type(&self) -> &str;

    /// Release connections. Safe to call more than once.
    async fn close(&self);
}
