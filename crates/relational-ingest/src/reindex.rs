//! Foreign key re-indexing.
//!
//! Every foreign key (possibly composite) is replaced by one column holding
//! the surrogate key of the referenced row, found with an order-preserving
//! hash equi-join. All joins read an immutable snapshot of the materialized
//! tables, so a table's own re-indexed columns never feed a later join,
//! including self-references.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::core::diagnostic::{Diagnostic, DiagnosticKind};
use crate::core::frame::{Frame, FrameColumn};
use crate::core::schema::{ForeignKeyDef, TableSchema};
use crate::core::value::{JoinKey, Value};
use crate::error::{IngestError, Result};
use crate::materialize::MaterializedTable;
use crate::typemap::ColumnType;

/// Prefix of every re-indexed foreign key column.
pub const FK_PREFIX: &str = "FK_";

/// Synthesized column name for a foreign key: `FK_<ref_table>_<cols joined by _>`.
pub fn fk_column_name(ref_table: &str, columns: &[String]) -> String {
    format!("{}{}_{}", FK_PREFIX, ref_table, columns.join("_"))
}

/// `base` if free, else the first of `base_2`, `base_3`, ... that is free.
pub fn unique_column_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Outcome of resolving one foreign key against its referenced table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKey {
    /// Referenced surrogate key per source row, `Null` when unmatched.
    pub values: Vec<Value>,
    /// Rows with a fully non-null key that matched nothing.
    pub orphans: usize,
}

/// Join a source frame's key columns against a referenced frame.
///
/// Columns pair positionally and all must agree. NULL never matches. When
/// the referenced columns are not unique, the first row in read order wins.
/// The output follows the source frame's row order.
pub fn resolve_foreign_key(
    source: (&str, &Frame, &[String]),
    reference: (&str, &Frame, &[String]),
    surrogate: &str,
) -> Result<ResolvedKey> {
    let (src_table, src_frame, src_cols) = source;
    let (ref_table, ref_frame, ref_cols) = reference;

    if src_cols.len() != ref_cols.len() || src_cols.is_empty() {
        return Err(IngestError::SchemaInconsistency(format!(
            "foreign key {}({}) -> {}({}) has mismatched column lists",
            src_table,
            src_cols.join(", "),
            ref_table,
            ref_cols.join(", ")
        )));
    }

    let src_columns = src_cols
        .iter()
        .map(|c| src_frame.require(src_table, c))
        .collect::<Result<Vec<_>>>()?;
    let ref_columns = ref_cols
        .iter()
        .map(|c| ref_frame.require(ref_table, c))
        .collect::<Result<Vec<_>>>()?;
    let ref_keys = ref_frame.require(ref_table, surrogate)?;

    let mut index: HashMap<Vec<JoinKey>, i64> = HashMap::with_capacity(ref_frame.len());
    for row in 0..ref_frame.len() {
        let Some(key) = row_key(&ref_columns, row) else {
            continue;
        };
        let Some(pk) = ref_keys.values[row].as_i64() else {
            continue;
        };
        index.entry(key).or_insert(pk);
    }

    let mut orphans = 0;
    let values = (0..src_frame.len())
        .map(|row| match row_key(&src_columns, row) {
            Some(key) => match index.get(&key) {
                Some(pk) => Value::I64(*pk),
                None => {
                    orphans += 1;
                    Value::Null
                }
            },
            None => Value::Null,
        })
        .collect();

    Ok(ResolvedKey { values, orphans })
}

fn row_key(columns: &[&FrameColumn], row: usize) -> Option<Vec<JoinKey>> {
    columns.iter().map(|c| c.values[row].join_key()).collect()
}

/// A table after re-indexing, ready for assembly.
#[derive(Debug, Clone)]
pub struct ReindexedTable {
    pub schema: TableSchema,
    pub frame: Frame,
    /// Re-indexed column name to referenced table name.
    pub fkey_col_to_pkey_table: BTreeMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// One planned re-indexed column.
struct PlannedColumn {
    name: String,
    ref_table: String,
    values: Vec<Value>,
}

/// Re-index every foreign key of every table.
///
/// All foreign keys are validated before any join runs: a reference to a
/// table that was not materialized, or to one without a primary key, is a
/// fatal schema inconsistency.
pub fn reindex_all(
    tables: Vec<MaterializedTable>,
    surrogate: &str,
) -> Result<Vec<ReindexedTable>> {
    let snapshot: BTreeMap<&str, &MaterializedTable> =
        tables.iter().map(|t| (t.name(), t)).collect();

    for table in &tables {
        for fk in &table.schema.foreign_keys {
            validate_foreign_key(table, fk, &snapshot)?;
        }
    }

    // Phase one: resolve everything against the untouched snapshot.
    let mut plans: Vec<(Vec<PlannedColumn>, Vec<Diagnostic>)> = Vec::with_capacity(tables.len());
    for table in &tables {
        plans.push(plan_table(table, &snapshot, surrogate)?);
    }
    drop(snapshot);

    // Phase two: attach the planned columns.
    let mut reindexed = Vec::with_capacity(tables.len());
    let mut fk_total = 0;
    for (table, (planned, extra)) in tables.into_iter().zip(plans) {
        let MaterializedTable {
            schema,
            mut frame,
            mut diagnostics,
        } = table;
        diagnostics.extend(extra);

        let mut fkey_col_to_pkey_table = BTreeMap::new();
        for column in planned {
            frame.push_column(FrameColumn::new(&column.name, ColumnType::Int64, column.values))?;
            fkey_col_to_pkey_table.insert(column.name, column.ref_table);
            fk_total += 1;
        }

        reindexed.push(ReindexedTable {
            schema,
            frame,
            fkey_col_to_pkey_table,
            diagnostics,
        });
    }

    info!(
        "Re-indexed {} foreign keys across {} tables",
        fk_total,
        reindexed.len()
    );
    Ok(reindexed)
}

fn validate_foreign_key(
    table: &MaterializedTable,
    fk: &ForeignKeyDef,
    snapshot: &BTreeMap<&str, &MaterializedTable>,
) -> Result<()> {
    let Some(target) = snapshot.get(fk.ref_table.as_str()) else {
        return Err(IngestError::SchemaInconsistency(format!(
            "foreign key {} on {} references table '{}' which was not materialized",
            fk.name,
            table.name(),
            fk.ref_table
        )));
    };
    if !target.schema.has_pk() {
        return Err(IngestError::SchemaInconsistency(format!(
            "foreign key {} on {} references table '{}' which has no primary key",
            fk.name,
            table.name(),
            fk.ref_table
        )));
    }
    if fk.columns.len() != fk.ref_columns.len() || fk.columns.is_empty() {
        return Err(IngestError::SchemaInconsistency(format!(
            "foreign key {} on {} pairs {} columns with {}",
            fk.name,
            table.name(),
            fk.columns.len(),
            fk.ref_columns.len()
        )));
    }
    for column in &fk.columns {
        if !table.frame.contains(column) {
            return Err(IngestError::SchemaInconsistency(format!(
                "foreign key {} uses missing column {}.{}",
                fk.name,
                table.name(),
                column
            )));
        }
    }
    for column in &fk.ref_columns {
        if !target.frame.contains(column) {
            return Err(IngestError::SchemaInconsistency(format!(
                "foreign key {} references missing column {}.{}",
                fk.name, fk.ref_table, column
            )));
        }
    }
    Ok(())
}

fn plan_table(
    table: &MaterializedTable,
    snapshot: &BTreeMap<&str, &MaterializedTable>,
    surrogate: &str,
) -> Result<(Vec<PlannedColumn>, Vec<Diagnostic>)> {
    let mut planned: Vec<PlannedColumn> = Vec::with_capacity(table.schema.foreign_keys.len());
    let mut diagnostics = Vec::new();

    for fk in &table.schema.foreign_keys {
        let target = snapshot.get(fk.ref_table.as_str()).ok_or_else(|| {
            IngestError::SchemaInconsistency(format!("unknown table '{}'", fk.ref_table))
        })?;

        let resolved = resolve_foreign_key(
            (table.name(), &table.frame, &fk.columns),
            (&fk.ref_table, &target.frame, &fk.ref_columns),
            surrogate,
        )?;

        let base = fk_column_name(&fk.ref_table, &fk.columns);
        let name = unique_column_name(&base, |candidate| {
            table.frame.contains(candidate) || planned.iter().any(|p| p.name == candidate)
        });
        if name != base {
            warn!(
                "Re-indexed column {} already exists on {}; using {}",
                base,
                table.name(),
                name
            );
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::NameCollision,
                table.name(),
                &name,
                format!("'{}' already taken", base),
            ));
        }

        if resolved.orphans > 0 {
            warn!(
                "{} rows of {} reference no row of {} via {}",
                resolved.orphans,
                table.name(),
                fk.ref_table,
                name
            );
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::OrphanedReferences,
                table.name(),
                &name,
                format!("{} orphaned references to {}", resolved.orphans, fk.ref_table),
            ));
        }

        debug!(
            "Re-indexed {}({}) -> {}({}) as {}",
            table.name(),
            fk.columns.join(", "),
            fk.ref_table,
            fk.ref_columns.join(", "),
            name
        );
        planned.push(PlannedColumn {
            name,
            ref_table: fk.ref_table.clone(),
            values: resolved.values,
        });
    }

    Ok((planned, diagnostics))
}

/// Remove the original primary and foreign key columns of a table.
///
/// Runs after every table has been re-indexed. The surrogate key and the
/// re-indexed columns are never removed.
pub fn strip_original_keys(table: &mut ReindexedTable, surrogate: &str) {
    let keys: BTreeSet<String> = table
        .schema
        .key_columns()
        .into_iter()
        .map(str::to_string)
        .collect();
    for key in keys {
        if key == surrogate || table.fkey_col_to_pkey_table.contains_key(&key) {
            continue;
        }
        if table.frame.remove_column(&key).is_some() {
            debug!("Dropped original key column {}.{}", table.schema.name, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::SURROGATE_KEY;
    use crate::typemap::ColumnType;

    fn frame(columns: Vec<(&str, Vec<Value>)>) -> Frame {
        Frame::from_columns(
            columns
                .into_iter()
                .map(|(name, values)| FrameColumn::new(name, ColumnType::Object, values))
                .collect(),
        )
        .unwrap()
    }

    fn pks(n: i64) -> Vec<Value> {
        (0..n).map(Value::I64).collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fk_column_name() {
        assert_eq!(fk_column_name("orders", &cols(&["o_id"])), "FK_orders_o_id");
        assert_eq!(fk_column_name("a", &cols(&["x", "y"])), "FK_a_x_y");
    }

    #[test]
    fn test_unique_column_name() {
        let taken = ["FK_a_x", "FK_a_x_2"];
        assert_eq!(unique_column_name("FK_b_x", |c| taken.contains(&c)), "FK_b_x");
        assert_eq!(unique_column_name("FK_a_x", |c| taken.contains(&c)), "FK_a_x_3");
    }

    #[test]
    fn test_resolve_preserves_source_order() {
        let reference = frame(vec![
            (SURROGATE_KEY, pks(3)),
            ("id", vec![Value::I32(10), Value::I32(20), Value::I32(30)]),
        ]);
        let source = frame(vec![("ref", vec![
            Value::I64(30),
            Value::I64(10),
            Value::Null,
            Value::I64(99),
            Value::I64(30),
        ])]);

        let resolved = resolve_foreign_key(
            ("s", &source, &cols(&["ref"])),
            ("r", &reference, &cols(&["id"])),
            SURROGATE_KEY,
        )
        .unwrap();

        assert_eq!(
            resolved.values,
            vec![
                Value::I64(2),
                Value::I64(0),
                Value::Null,
                Value::Null,
                Value::I64(2)
            ]
        );
        assert_eq!(resolved.orphans, 1);
    }

    #[test]
    fn test_resolve_composite_is_conjunctive() {
        let reference = frame(vec![
            (SURROGATE_KEY, pks(3)),
            ("x", vec![Value::I32(1), Value::I32(1), Value::I32(2)]),
            ("y", vec!["a".into(), "b".into(), "a".into()]),
        ]);
        let source = frame(vec![
            ("bx", vec![Value::I32(1), Value::I32(1), Value::I32(2), Value::I32(1)]),
            ("by", vec!["b".into(), "a".into(), "b".into(), Value::Null]),
        ]);

        let resolved = resolve_foreign_key(
            ("b", &source, &cols(&["bx", "by"])),
            ("a", &reference, &cols(&["x", "y"])),
            SURROGATE_KEY,
        )
        .unwrap();

        assert_eq!(
            resolved.values,
            vec![Value::I64(1), Value::I64(0), Value::Null, Value::Null]
        );
        // (2, b) has no match; (1, NULL) is not an orphan
        assert_eq!(resolved.orphans, 1);
    }

    #[test]
    fn test_resolve_first_duplicate_wins() {
        let reference = frame(vec![
            (SURROGATE_KEY, pks(2)),
            ("code", vec!["x".into(), "x".into()]),
        ]);
        let source = frame(vec![("c", vec!["x".into()])]);
        let resolved = resolve_foreign_key(
            ("s", &source, &cols(&["c"])),
            ("r", &reference, &cols(&["code"])),
            SURROGATE_KEY,
        )
        .unwrap();
        assert_eq!(resolved.values, vec![Value::I64(0)]);
    }

    #[test]
    fn test_resolve_arity_mismatch() {
        let f = frame(vec![(SURROGATE_KEY, pks(1)), ("a", pks(1))]);
        let err = resolve_foreign_key(
            ("s", &f, &cols(&["a"])),
            ("r", &f, &cols(&["a", "a"])),
            SURROGATE_KEY,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::SchemaInconsistency(_)));
    }
}
