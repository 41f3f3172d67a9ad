//! Catalog metadata for tables, columns and key constraints.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::typemap::NativeType;

/// Column metadata as reported by the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,

    /// Catalog type name (`int`, `varchar`, `int4`, ...).
    pub data_type: String,

    /// Classified native category; `None` for types outside the mapping table.
    pub native: Option<NativeType>,

    /// Whether the column is nullable.
    pub nullable: bool,

    /// Ordinal position within the table (1-based).
    pub ordinal_pos: i32,
}

impl ColumnDef {
    /// Create a nullable column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, native: Option<NativeType>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            native,
            nullable: true,
            ordinal_pos: 0,
        }
    }
}

/// Primary key: an unordered, non-empty set of local column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyDef {
    columns: BTreeSet<String>,
}

impl PrimaryKeyDef {
    /// Build a primary key from column names. Returns `None` when empty.
    pub fn new<I, S>(columns: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: BTreeSet<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            None
        } else {
            Some(Self { columns })
        }
    }

    /// Key column names in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Check if a column is part of the key.
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    /// Number of key columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Foreign key constraint with positionally paired column lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Constraint name (may be empty for synthesized keys).
    pub name: String,

    /// Local column names, in constraint order.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names, paired with `columns`.
    pub ref_columns: Vec<String>,
}

impl ForeignKeyDef {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
        ref_table: impl Into<String>,
        ref_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Local columns as a set, used to collapse duplicate constraints.
    pub fn column_set(&self) -> BTreeSet<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    pub fn is_self_reference(&self, table: &str) -> bool {
        self.ref_table == table
    }
}

/// Complete catalog description of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Option<PrimaryKeyDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableSchema {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check if the table declares a column.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Column names in catalog order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        self.primary_key.is_some()
    }

    /// Original key columns: primary key plus every foreign key source column.
    pub fn key_columns(&self) -> BTreeSet<&str> {
        let mut keys: BTreeSet<&str> = self
            .primary_key
            .iter()
            .flat_map(|pk| pk.columns())
            .collect();
        for fk in &self.foreign_keys {
            keys.extend(fk.columns.iter().map(String::as_str));
        }
        keys
    }
}
