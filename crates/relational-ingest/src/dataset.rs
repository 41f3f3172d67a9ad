//! Assembled datasets.
//!
//! A [`Table`] is a re-indexed frame plus its key metadata. A [`Dataset`] is a
//! name-ordered collection of tables. Both are values: post-processing takes
//! one and returns a new one rather than editing in place.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::SplitTimestamps;
use crate::core::diagnostic::Diagnostic;
use crate::core::frame::Frame;
use crate::error::{IngestError, Result};
use crate::reindex::ReindexedTable;

/// One table of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    frame: Frame,
    pkey_col: String,
    fkey_col_to_pkey_table: BTreeMap<String, String>,
    time_col: Option<String>,
}

impl Table {
    /// Build a table, checking that the key columns exist in the frame.
    pub fn new(
        frame: Frame,
        pkey_col: impl Into<String>,
        fkey_col_to_pkey_table: BTreeMap<String, String>,
        time_col: Option<String>,
    ) -> Result<Self> {
        let pkey_col = pkey_col.into();
        if !frame.contains(&pkey_col) {
            return Err(IngestError::InvalidFrame(format!(
                "surrogate key column '{}' is missing",
                pkey_col
            )));
        }
        if let Some(col) = fkey_col_to_pkey_table.keys().find(|c| !frame.contains(c)) {
            return Err(IngestError::InvalidFrame(format!(
                "foreign key column '{}' is missing",
                col
            )));
        }
        Ok(Self {
            frame,
            pkey_col,
            fkey_col_to_pkey_table,
            time_col,
        })
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Surrogate key column name.
    pub fn pkey_col(&self) -> &str {
        &self.pkey_col
    }

    /// Re-indexed column name to referenced table name.
    pub fn fkey_col_to_pkey_table(&self) -> &BTreeMap<String, String> {
        &self.fkey_col_to_pkey_table
    }

    /// Designated temporal column, if any.
    pub fn time_col(&self) -> Option<&str> {
        self.time_col.as_deref()
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Same metadata over a transformed frame.
    ///
    /// Foreign key entries whose column no longer exists are dropped; the
    /// surrogate key column must survive.
    pub fn map_frame<F>(self, f: F) -> Result<Self>
    where
        F: FnOnce(Frame) -> Result<Frame>,
    {
        let frame = f(self.frame)?;
        let fkeys = self
            .fkey_col_to_pkey_table
            .into_iter()
            .filter(|(col, _)| frame.contains(col))
            .collect();
        Table::new(frame, self.pkey_col, fkeys, self.time_col)
    }

    /// Register a re-indexed column that already exists in the frame.
    pub fn with_fkey(self, column: impl Into<String>, ref_table: impl Into<String>) -> Result<Self> {
        let mut fkeys = self.fkey_col_to_pkey_table;
        fkeys.insert(column.into(), ref_table.into());
        Table::new(self.frame, self.pkey_col, fkeys, self.time_col)
    }

    /// Forget a foreign key mapping, keeping the column.
    pub fn without_fkey(mut self, column: &str) -> Self {
        self.fkey_col_to_pkey_table.remove(column);
        self
    }

    pub fn with_time_col(mut self, time_col: Option<String>) -> Self {
        self.time_col = time_col;
        self
    }

    pub fn summary(&self, name: &str) -> TableSummary {
        TableSummary {
            name: name.to_string(),
            rows: self.len(),
            columns: self.frame.column_names().map(str::to_string).collect(),
            primary_key: self.pkey_col.clone(),
            foreign_keys: self.fkey_col_to_pkey_table.clone(),
            time_column: self.time_col.clone(),
        }
    }
}

/// Named tables plus everything observed while building them.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    tables: BTreeMap<String, Table>,
    diagnostics: Vec<Diagnostic>,
    splits: Option<SplitTimestamps>,
    config_hash: Option<String>,
}

impl Dataset {
    /// Package re-indexed tables and attach temporal column designations.
    ///
    /// Performs no joins or lookups. Designations for tables that were not
    /// materialized are ignored with a warning.
    pub fn assemble(
        tables: Vec<ReindexedTable>,
        surrogate: &str,
        time_col_dict: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut dataset = Dataset::default();
        for table in tables {
            let name = table.schema.name;
            let time_col = time_col_dict.get(&name).cloned();
            dataset.diagnostics.extend(table.diagnostics);
            let table = Table::new(table.frame, surrogate, table.fkey_col_to_pkey_table, time_col)?;
            dataset.tables.insert(name, table);
        }

        for table in time_col_dict.keys() {
            if !dataset.tables.contains_key(table) {
                warn!("Temporal column given for unknown table {}", table);
            }
        }

        info!(
            "Assembled dataset: {} tables, {} rows",
            dataset.tables.len(),
            dataset.total_rows()
        );
        Ok(dataset)
    }

    pub fn tables(&self) -> &BTreeMap<String, Table> {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn splits(&self) -> Option<SplitTimestamps> {
        self.splits
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Table::len).sum()
    }

    /// Attach the configuration hash and split timestamps of the build.
    pub fn with_build_info(mut self, config_hash: String, splits: Option<SplitTimestamps>) -> Self {
        self.config_hash = Some(config_hash);
        self.splits = splits;
        self
    }

    /// Take a table out of the dataset.
    pub fn take_table(&mut self, name: &str) -> Option<Table> {
        self.tables.remove(name)
    }

    /// Insert or replace a table.
    pub fn insert_table(&mut self, name: impl Into<String>, table: Table) {
        self.tables.insert(name.into(), table);
    }

    /// Record a condition observed after assembly.
    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Temporal designations whose column is missing from its table.
    pub fn dangling_time_cols(&self) -> Vec<(String, String)> {
        self.tables
            .iter()
            .filter_map(|(name, table)| {
                let col = table.time_col()?;
                (!table.frame().contains(col)).then(|| (name.clone(), col.to_string()))
            })
            .collect()
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            config_hash: self.config_hash.clone(),
            total_rows: self.total_rows(),
            tables: self
                .tables
                .iter()
                .map(|(name, table)| table.summary(name))
                .collect(),
            diagnostics: self.diagnostics.clone(),
            splits: self.splits,
        }
    }
}

/// Serializable description of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub primary_key: String,
    pub foreign_keys: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_column: Option<String>,
}

/// Serializable description of a built dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    pub total_rows: usize,
    pub tables: Vec<TableSummary>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splits: Option<SplitTimestamps>,
}

impl DatasetSummary {
    /// Convert to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::FrameColumn;
    use crate::core::schema::TableSchema;
    use crate::core::value::Value;
    use crate::typemap::ColumnType;

    fn reindexed(name: &str, fk: Option<(&str, &str)>) -> ReindexedTable {
        let mut columns = vec![FrameColumn::new(
            "__PK__",
            ColumnType::Int64,
            vec![Value::I64(0), Value::I64(1)],
        )];
        let mut fkeys = BTreeMap::new();
        if let Some((col, target)) = fk {
            columns.push(FrameColumn::new(
                col,
                ColumnType::Int64,
                vec![Value::I64(1), Value::Null],
            ));
            fkeys.insert(col.to_string(), target.to_string());
        }
        ReindexedTable {
            schema: TableSchema {
                name: name.into(),
                columns: vec![],
                primary_key: None,
                foreign_keys: vec![],
            },
            frame: Frame::from_columns(columns).unwrap(),
            fkey_col_to_pkey_table: fkeys,
            diagnostics: vec![],
        }
    }

    #[test]
    fn test_assemble_attaches_metadata() {
        let time_cols = BTreeMap::from([("b".to_string(), "ts".to_string())]);
        let dataset = Dataset::assemble(
            vec![reindexed("a", None), reindexed("b", Some(("FK_a_x", "a")))],
            "__PK__",
            &time_cols,
        )
        .unwrap();

        let b = dataset.table("b").unwrap();
        assert_eq!(b.pkey_col(), "__PK__");
        assert_eq!(b.fkey_col_to_pkey_table()["FK_a_x"], "a");
        assert_eq!(b.time_col(), Some("ts"));
        assert_eq!(dataset.table("a").unwrap().time_col(), None);
        assert_eq!(dataset.total_rows(), 4);
        assert_eq!(dataset.dangling_time_cols(), vec![("b".into(), "ts".into())]);
    }

    #[test]
    fn test_map_frame_drops_vanished_fkeys() {
        let dataset = Dataset::assemble(
            vec![reindexed("b", Some(("FK_a_x", "a")))],
            "__PK__",
            &BTreeMap::new(),
        )
        .unwrap();
        let table = dataset.table("b").unwrap().clone();
        let table = table
            .map_frame(|mut f| {
                f.remove_column("FK_a_x");
                Ok(f)
            })
            .unwrap();
        assert!(table.fkey_col_to_pkey_table().is_empty());

        let err = table.map_frame(|mut f| {
            f.remove_column("__PK__");
            Ok(f)
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_summary_json() {
        let dataset = Dataset::assemble(vec![reindexed("a", None)], "__PK__", &BTreeMap::new())
            .unwrap()
            .with_build_info("abc".into(), None);
        let json = dataset.summary().to_json().unwrap();
        assert!(json.contains("\"config_hash\": \"abc\""));
        assert!(json.contains("\"primary_key\": \"__PK__\""));
        assert!(!json.contains("splits"));
    }
}
