//! In-memory schema source.
//!
//! Holds tables, keys and rows in process memory. Used for tests and for
//! building datasets from fixtures without a database server. Clones share
//! their counters, so a handle kept by the caller observes reads and
//! `close()` calls made through another clone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::schema::{ColumnDef, ForeignKeyDef, PrimaryKeyDef};
use crate::core::traits::{SchemaSource, TableRows};
use crate::core::value::Value;
use crate::error::{IngestError, Result};
use crate::typemap::NativeType;

/// One table held by a [`MemorySource`].
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    columns: Vec<ColumnDef>,
    primary_key: Option<PrimaryKeyDef>,
    foreign_keys: Vec<ForeignKeyDef>,
    rows: Vec<Vec<Value>>,
    undecoded: BTreeMap<String, usize>,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            rows: Vec::new(),
            undecoded: BTreeMap::new(),
        }
    }

    /// Add a column of a mapped native category.
    pub fn column(self, name: &str, native: NativeType) -> Self {
        let data_type = serde_json::to_value(native)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        self.push_column(name, data_type, Some(native))
    }

    /// Add a column whose catalog type has no mapping.
    pub fn unsupported_column(self, name: &str, data_type: &str) -> Self {
        self.push_column(name, data_type.to_string(), None)
    }

    fn push_column(mut self, name: &str, data_type: String, native: Option<NativeType>) -> Self {
        let ordinal_pos = self.columns.len() as i32 + 1;
        self.columns.push(ColumnDef {
            name: name.to_string(),
            data_type,
            native,
            nullable: true,
            ordinal_pos,
        });
        self
    }

    pub fn primary_key<const N: usize>(mut self, columns: [&str; N]) -> Self {
        self.primary_key = PrimaryKeyDef::new(columns);
        self
    }

    pub fn foreign_key<const N: usize>(
        mut self,
        columns: [&str; N],
        ref_table: &str,
        ref_columns: [&str; N],
    ) -> Self {
        let name = format!("fk_{}_{}", self.name, self.foreign_keys.len() + 1);
        self.foreign_keys
            .push(ForeignKeyDef::new(name, columns, ref_table, ref_columns));
        self
    }

    /// Append one row; values are positional in column order.
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Report `count` cells of `column` as undecodable on every read.
    pub fn undecoded(mut self, column: &str, count: usize) -> Self {
        self.undecoded.insert(column.to_string(), count);
        self
    }
}

#[derive(Debug, Default)]
struct Stats {
    reads: AtomicUsize,
    catalog_queries: AtomicUsize,
    closed: AtomicBool,
}

/// [`SchemaSource`] over in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: Arc<BTreeMap<String, MemoryTable>>,
    failing_reads: Arc<BTreeSet<String>>,
    stats: Arc<Stats>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table.
    pub fn with_table(mut self, table: MemoryTable) -> Self {
        Arc::make_mut(&mut self.tables).insert(table.name.clone(), table);
        self
    }

    /// Make reads of `table` fail, to exercise error paths.
    pub fn failing_read(mut self, table: &str) -> Self {
        Arc::make_mut(&mut self.failing_reads).insert(table.to_string());
        self
    }

    /// Number of `read_table` calls served.
    pub fn read_count(&self) -> usize {
        self.stats.reads.load(Ordering::SeqCst)
    }

    /// Number of catalog calls served (tables, columns, keys).
    pub fn catalog_query_count(&self) -> usize {
        self.stats.catalog_queries.load(Ordering::SeqCst)
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.stats.closed.load(Ordering::SeqCst)
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.stats.catalog_queries.fetch_add(1, Ordering::SeqCst);
        self.tables
            .get(name)
            .ok_or_else(|| IngestError::TableNotFound(name.to_string()))
    }
}

#[async_trait]
impl SchemaSource for MemorySource {
    async fn table_names(&self) -> Result<Vec<String>> {
        self.stats.catalog_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.keys().cloned().collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        Ok(self.table(table)?.columns.clone())
    }

    async fn primary_key(&self, table: &str) -> Result<Option<PrimaryKeyDef>> {
        Ok(self.table(table)?.primary_key.clone())
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>> {
        Ok(self.table(table)?.foreign_keys.clone())
    }

    async fn read_table(&self, table: &str, columns: &[ColumnDef]) -> Result<TableRows> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.contains(table) {
            return Err(IngestError::materialize(table, "simulated read failure"));
        }
        let stored = self
            .tables
            .get(table)
            .ok_or_else(|| IngestError::TableNotFound(table.to_string()))?;

        let positions = columns
            .iter()
            .map(|c| {
                stored
                    .columns
                    .iter()
                    .position(|s| s.name == c.name)
                    .ok_or_else(|| IngestError::ColumnNotFound(format!("{}.{}", table, c.name)))
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = stored
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|&p| row.get(p).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        let failures: Vec<usize> = columns
            .iter()
            .map(|c| stored.undecoded.get(&c.name).copied().unwrap_or(0))
            .collect();
        Ok(TableRows::new(rows).with_failures(columns, &failures))
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {
        self.stats.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemorySource {
        MemorySource::new().with_table(
            MemoryTable::new("t")
                .column("id", NativeType::Integer)
                .column("name", NativeType::String)
                .primary_key(["id"])
                .row(vec![Value::I32(1), "a".into()])
                .row(vec![Value::I32(2), "b".into()]),
        )
    }

    #[tokio::test]
    async fn test_catalog() {
        let src = source();
        assert_eq!(src.table_names().await.unwrap(), vec!["t".to_string()]);
        let cols = src.columns("t").await.unwrap();
        assert_eq!(cols[0].data_type, "integer");
        assert_eq!(cols[1].ordinal_pos, 2);
        assert!(src.primary_key("t").await.unwrap().is_some());
        assert!(matches!(
            src.columns("missing").await,
            Err(IngestError::TableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_read_projects_columns() {
        let src = source();
        let cols = src.columns("t").await.unwrap();
        let read = src.read_table("t", &cols[1..]).await.unwrap();
        assert_eq!(read.rows, vec![vec![Value::from("a")], vec![Value::from("b")]]);
        assert!(read.undecoded.is_empty());
        assert_eq!(src.read_count(), 1);
    }

    #[tokio::test]
    async fn test_undecoded_counts_only_requested_columns() {
        let src = MemorySource::new().with_table(
            MemoryTable::new("t")
                .column("id", NativeType::Integer)
                .column("at", NativeType::DateTime)
                .undecoded("at", 2)
                .row(vec![Value::I32(1), Value::Null]),
        );
        let cols = src.columns("t").await.unwrap();
        assert_eq!(src.read_table("t", &cols).await.unwrap().undecoded["at"], 2);
        assert!(src.read_table("t", &cols[..1]).await.unwrap().undecoded.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let src = source();
        let handle = src.clone();
        src.close().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_failing_read() {
        let src = source().failing_read("t");
        let cols = src.columns("t").await.unwrap();
        assert!(src.read_table("t", &cols).await.is_err());
    }
}
