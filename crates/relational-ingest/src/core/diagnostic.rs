//! Recoverable conditions observed during a build.
//!
//! Diagnostics are logged as they happen and also collected on the dataset,
//! so callers can inspect them without installing a tracing subscriber.

use std::fmt;

use serde::Serialize;

/// Kind of recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Catalog type outside the mapping table; column kept with inferred type.
    UnsupportedType,
    /// Temporal column could not be parsed; raw values kept.
    TemporalFallback,
    /// Values did not fit the mapped type; column kept untyped.
    CoercionFallback,
    /// Two re-indexed columns on one table synthesized the same name.
    NameCollision,
    /// Foreign key values without a matching referenced row.
    OrphanedReferences,
}

/// A recoverable condition tied to one table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub table: String,
    pub column: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.table, self.column, self.message)
    }
}
