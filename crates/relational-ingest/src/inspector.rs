//! Schema inspection with a per-build metadata cache.
//!
//! The [`Inspector`] only issues catalog queries. Every answer is cached in
//! an explicit [`MetadataCache`] owned by the inspector, so one build never
//! asks the source the same question twice.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::Mutex;
use tracing::debug;

use crate::core::schema::{ColumnDef, ForeignKeyDef, PrimaryKeyDef, TableSchema};
use crate::core::traits::SchemaSource;
use crate::error::{IngestError, Result};
use crate::typemap::NativeType;

/// Catalog answers remembered for the lifetime of one build.
#[derive(Debug, Default, Clone)]
pub struct MetadataCache {
    tables: Option<Vec<String>>,
    columns: HashMap<String, Vec<ColumnDef>>,
    primary_keys: HashMap<String, Option<PrimaryKeyDef>>,
    foreign_keys: HashMap<String, Vec<ForeignKeyDef>>,
}

impl MetadataCache {
    /// Number of tables with cached column lists.
    pub fn cached_tables(&self) -> usize {
        self.columns.len()
    }
}

/// Table type scheme: table name to column name to native category.
pub type Scheme = BTreeMap<String, BTreeMap<String, Option<NativeType>>>;

/// Read-only catalog access over a [`SchemaSource`].
pub struct Inspector<'a, S: SchemaSource + ?Sized> {
    source: &'a S,
    cache: Mutex<MetadataCache>,
}

impl<'a, S: SchemaSource + ?Sized> Inspector<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            cache: Mutex::new(MetadataCache::default()),
        }
    }

    /// Table names, sorted.
    pub async fn tables(&self) -> Result<Vec<String>> {
        if let Some(tables) = &self.cache.lock().await.tables {
            return Ok(tables.clone());
        }
        let mut tables = self.source.table_names().await?;
        tables.sort();
        self.cache.lock().await.tables = Some(tables.clone());
        Ok(tables)
    }

    /// Columns of a table in ordinal order.
    pub async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        if let Some(columns) = self.cache.lock().await.columns.get(table) {
            return Ok(columns.clone());
        }
        let columns = self.source.columns(table).await?;
        if columns.is_empty() {
            return Err(IngestError::TableNotFound(table.to_string()));
        }
        self.cache
            .lock()
            .await
            .columns
            .insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    /// Primary key of a table, `None` when it declares none.
    pub async fn primary_key(&self, table: &str) -> Result<Option<PrimaryKeyDef>> {
        if let Some(pk) = self.cache.lock().await.primary_keys.get(table) {
            return Ok(pk.clone());
        }
        let pk = self.source.primary_key(table).await?;
        self.cache
            .lock()
            .await
            .primary_keys
            .insert(table.to_string(), pk.clone());
        Ok(pk)
    }

    /// Foreign keys of a table.
    ///
    /// Constraints over the same set of local columns are collapsed to the
    /// first one reported by the catalog.
    pub async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>> {
        if let Some(fks) = self.cache.lock().await.foreign_keys.get(table) {
            return Ok(fks.clone());
        }
        let reported = self.source.foreign_keys(table).await?;
        let fks = dedupe_foreign_keys(table, reported);
        self.cache
            .lock()
            .await
            .foreign_keys
            .insert(table.to_string(), fks.clone());
        Ok(fks)
    }

    /// Complete catalog description of one table.
    pub async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        Ok(TableSchema {
            name: table.to_string(),
            columns: self.columns(table).await?,
            primary_key: self.primary_key(table).await?,
            foreign_keys: self.foreign_keys(table).await?,
        })
    }

    /// Catalog descriptions of every table, in name order.
    pub async fn schemas(&self) -> Result<Vec<TableSchema>> {
        let mut schemas = Vec::new();
        for table in self.tables().await? {
            schemas.push(self.table_schema(&table).await?);
        }
        Ok(schemas)
    }

    /// Every (table, column) pair in the database.
    pub async fn table_column_pairs(&self) -> Result<BTreeSet<(String, String)>> {
        let mut pairs = BTreeSet::new();
        for table in self.tables().await? {
            for column in self.columns(&table).await? {
                pairs.insert((table.clone(), column.name));
            }
        }
        Ok(pairs)
    }

    /// Native category of every column, without reading any data.
    pub async fn scheme(&self) -> Result<Scheme> {
        let mut scheme = Scheme::new();
        for table in self.tables().await? {
            let columns = self
                .columns(&table)
                .await?
                .into_iter()
                .map(|c| (c.name, c.native))
                .collect();
            scheme.insert(table, columns);
        }
        Ok(scheme)
    }

    /// Snapshot of the cache.
    pub async fn cache(&self) -> MetadataCache {
        self.cache.lock().await.clone()
    }
}

/// Drop constraints that repeat an earlier one exactly.
///
/// Distinct constraints over the same source columns are all kept.
fn dedupe_foreign_keys(table: &str, reported: Vec<ForeignKeyDef>) -> Vec<ForeignKeyDef> {
    let mut kept: Vec<ForeignKeyDef> = Vec::with_capacity(reported.len());
    for fk in reported {
        let duplicate = kept.iter().any(|k| {
            k.columns == fk.columns && k.ref_table == fk.ref_table && k.ref_columns == fk.ref_columns
        });
        if duplicate {
            debug!(
                "Skipping duplicate foreign key {} on {} ({})",
                fk.name,
                table,
                fk.columns.join(", ")
            );
            continue;
        }
        kept.push(fk);
    }
    kept
}
