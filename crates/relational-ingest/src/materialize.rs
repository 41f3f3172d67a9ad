//! Table materialization.
//!
//! Each table is read once, its columns are coerced to their in-memory types,
//! and a dense surrogate key column is prepended in read order.

use tracing::{debug, warn};

use crate::core::diagnostic::{Diagnostic, DiagnosticKind};
use crate::core::frame::{Frame, FrameColumn};
use crate::core::schema::{ColumnDef, TableSchema};
use crate::core::traits::{SchemaSource, TableRows};
use crate::core::value::{in_timestamp_range, Value};
use crate::error::{IngestError, Result};
use crate::typemap::{infer_column_type, is_temporal, map_native, ColumnType};

/// Reserved surrogate key column name.
pub const SURROGATE_KEY: &str = "__PK__";

/// Surrogate key column name that collides with no real column in any table.
///
/// Starts from [`SURROGATE_KEY`] and appends underscores until it is free.
pub fn surrogate_key_name(schemas: &[TableSchema]) -> String {
    let mut name = SURROGATE_KEY.to_string();
    while schemas.iter().any(|s| s.has_column(&name)) {
        name.push('_');
    }
    name
}

/// A table read into memory, before re-indexing.
#[derive(Debug, Clone)]
pub struct MaterializedTable {
    pub schema: TableSchema,
    pub frame: Frame,
    pub diagnostics: Vec<Diagnostic>,
}

impl MaterializedTable {
    pub fn name(&self) -> &str {
        &self.schema.name
    }
}

/// Read one table with a single bulk read and build its frame.
pub async fn materialize_table<S: SchemaSource + ?Sized>(
    source: &S,
    schema: TableSchema,
    surrogate: &str,
) -> Result<MaterializedTable> {
    let read = source.read_table(&schema.name, &schema.columns).await?;
    let undecoded = undecoded_diagnostics(&schema.name, &read);
    let mut table = build_frame(schema, read.rows, surrogate)?;
    table.diagnostics.extend(undecoded);
    Ok(table)
}

/// One diagnostic per column with cells the driver could not decode.
fn undecoded_diagnostics(table: &str, read: &TableRows) -> Vec<Diagnostic> {
    read.undecoded
        .iter()
        .map(|(column, &count)| {
            warn!(
                "{} of {} cells in {}.{} could not be decoded; read as NULL",
                count,
                read.rows.len(),
                table,
                column
            );
            Diagnostic::new(
                DiagnosticKind::CoercionFallback,
                table,
                column,
                format!("{} undecodable cells read as NULL", count),
            )
        })
        .collect()
}

/// Build a frame from row-major values read for `schema.columns`.
pub fn build_frame(
    schema: TableSchema,
    rows: Vec<Vec<Value>>,
    surrogate: &str,
) -> Result<MaterializedTable> {
    let width = schema.columns.len();
    let len = rows.len();

    let mut raw_columns: Vec<Vec<Value>> = (0..width).map(|_| Vec::with_capacity(len)).collect();
    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != width {
            return Err(IngestError::materialize(
                &schema.name,
                format!("row {} has {} values, expected {}", i, row.len(), width),
            ));
        }
        for (column, value) in raw_columns.iter_mut().zip(row) {
            column.push(value);
        }
    }

    let mut diagnostics = Vec::new();
    let mut columns = Vec::with_capacity(width + 1);
    columns.push(FrameColumn::new(
        surrogate,
        ColumnType::Int64,
        (0..len as i64).map(Value::I64).collect(),
    ));
    for (def, values) in schema.columns.iter().zip(raw_columns) {
        columns.push(build_column(&schema.name, def, values, &mut diagnostics));
    }

    let frame = Frame::from_columns(columns)?;
    debug!(
        "Materialized {} ({} rows, {} columns)",
        schema.name,
        frame.len(),
        frame.width()
    );

    Ok(MaterializedTable {
        schema,
        frame,
        diagnostics,
    })
}

fn build_column(
    table: &str,
    def: &ColumnDef,
    values: Vec<Value>,
    diagnostics: &mut Vec<Diagnostic>,
) -> FrameColumn {
    let Some(native) = def.native else {
        let dtype = infer_column_type(&values);
        warn!(
            "Unsupported type '{}' for {}.{}; inferred {:?}",
            def.data_type, table, def.name, dtype
        );
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::UnsupportedType,
            table,
            &def.name,
            format!("unsupported native type '{}'", def.data_type),
        ));
        return FrameColumn::new(&def.name, dtype, values);
    };

    if is_temporal(native) {
        return match parse_timestamps(&values) {
            Some(parsed) => FrameColumn::new(&def.name, ColumnType::Timestamp, parsed),
            None => {
                warn!(
                    "Could not parse {}.{} as timestamps; keeping raw values",
                    table, def.name
                );
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::TemporalFallback,
                    table,
                    &def.name,
                    "values outside the timestamp range; kept raw",
                ));
                FrameColumn::new(&def.name, ColumnType::Object, values)
            }
        };
    }

    let dtype = map_native(native);
    match coerce_column(&values, dtype) {
        Some(coerced) => FrameColumn::new(&def.name, dtype, coerced),
        None => {
            warn!(
                "Values of {}.{} do not fit {:?}; keeping raw values",
                table, def.name, dtype
            );
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::CoercionFallback,
                table,
                &def.name,
                format!("values do not fit {:?}; kept untyped", dtype),
            ));
            FrameColumn::new(&def.name, ColumnType::Object, values)
        }
    }
}

/// Parse a whole column into timestamps.
///
/// Returns `None` if any non-null cell cannot be parsed or lies outside the
/// nanosecond timestamp range; the caller then keeps the raw column.
pub fn parse_timestamps(values: &[Value]) -> Option<Vec<Value>> {
    values
        .iter()
        .map(|v| {
            if v.is_null() {
                return Some(Value::Null);
            }
            v.as_datetime()
                .filter(in_timestamp_range)
                .map(Value::Timestamp)
        })
        .collect()
}

/// Coerce every cell to `dtype`, or `None` if any non-null cell does not fit.
pub fn coerce_column(values: &[Value], dtype: ColumnType) -> Option<Vec<Value>> {
    values.iter().map(|v| coerce_value(v, dtype)).collect()
}

fn coerce_value(value: &Value, dtype: ColumnType) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    match dtype {
        ColumnType::Int64 => value.as_i64().map(Value::I64),
        ColumnType::Int32 => value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Value::I32),
        ColumnType::Int16 => value
            .as_i64()
            .and_then(|v| i16::try_from(v).ok())
            .map(Value::I16),
        ColumnType::Boolean => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            other => other.as_i64().map(|v| Value::Bool(v != 0)),
        },
        ColumnType::Float64 => value.as_f64().map(Value::F64),
        ColumnType::String | ColumnType::Categorical => match value {
            Value::Text(s) => Some(Value::Text(s.clone())),
            Value::Bool(b) => Some(Value::Text(b.to_string())),
            Value::I16(_) | Value::I32(_) | Value::I64(_) => {
                value.as_i64().map(|v| Value::Text(v.to_string()))
            }
            Value::F32(v) => Some(Value::Text(v.to_string())),
            Value::F64(v) => Some(Value::Text(v.to_string())),
            Value::Decimal(d) => Some(Value::Text(d.to_string())),
            Value::Uuid(u) => Some(Value::Text(u.to_string())),
            _ => None,
        },
        ColumnType::Timestamp => value
            .as_datetime()
            .filter(in_timestamp_range)
            .map(Value::Timestamp),
        ColumnType::Timedelta => value.as_duration().map(Value::Interval),
        ColumnType::Object => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::PrimaryKeyDef;
    use crate::typemap::NativeType;
    use chrono::NaiveDate;

    fn schema(columns: Vec<ColumnDef>) -> TableSchema {
        TableSchema {
            name: "t".into(),
            columns,
            primary_key: PrimaryKeyDef::new(["id"]),
            foreign_keys: vec![],
        }
    }

    #[test]
    fn test_surrogate_key_is_dense_and_first() {
        let schema = schema(vec![ColumnDef::new("id", "int", Some(NativeType::Integer))]);
        let rows = vec![vec![Value::I32(30)], vec![Value::I32(10)], vec![Value::I32(20)]];
        let table = build_frame(schema, rows, SURROGATE_KEY).unwrap();

        let pk = &table.frame.columns()[0];
        assert_eq!(pk.name, SURROGATE_KEY);
        assert_eq!(pk.values, vec![Value::I64(0), Value::I64(1), Value::I64(2)]);
        // read order is kept
        assert_eq!(
            table.frame.column("id").unwrap().values,
            vec![Value::I32(30), Value::I32(10), Value::I32(20)]
        );
    }

    #[test]
    fn test_surrogate_key_name_avoids_collisions() {
        let a = schema(vec![ColumnDef::new("__PK__", "int", Some(NativeType::Integer))]);
        let b = schema(vec![ColumnDef::new("__PK___", "int", Some(NativeType::Integer))]);
        assert_eq!(surrogate_key_name(&[]), "__PK__");
        assert_eq!(surrogate_key_name(&[a, b]), "__PK____");
    }

    #[test]
    fn test_unsupported_type_emits_diagnostic() {
        let schema = schema(vec![
            ColumnDef::new("id", "int", Some(NativeType::Integer)),
            ColumnDef::new("shape", "geometry", None),
        ]);
        let rows = vec![vec![Value::I32(1), Value::from("POINT(0 0)")]];
        let table = build_frame(schema, rows, SURROGATE_KEY).unwrap();

        assert_eq!(table.frame.column("shape").unwrap().dtype, ColumnType::String);
        assert_eq!(table.diagnostics.len(), 1);
        assert_eq!(table.diagnostics[0].kind, DiagnosticKind::UnsupportedType);
    }

    #[test]
    fn test_temporal_parse_and_fallback() {
        let ok = NaiveDate::from_ymd_opt(2003, 5, 1).unwrap();
        let ancient = NaiveDate::from_ymd_opt(1602, 3, 20).unwrap();
        let schema = schema(vec![
            ColumnDef::new("good", "date", Some(NativeType::Date)),
            ColumnDef::new("old", "date", Some(NativeType::Date)),
        ]);
        let rows = vec![
            vec![Value::Date(ok), Value::Date(ancient)],
            vec![Value::Null, Value::Date(ok)],
        ];
        let table = build_frame(schema, rows, SURROGATE_KEY).unwrap();

        let good = table.frame.column("good").unwrap();
        assert_eq!(good.dtype, ColumnType::Timestamp);
        assert_eq!(good.values[1], Value::Null);

        let old = table.frame.column("old").unwrap();
        assert_eq!(old.dtype, ColumnType::Object);
        assert_eq!(old.values[0], Value::Date(ancient));
        assert_eq!(table.diagnostics[0].kind, DiagnosticKind::TemporalFallback);
    }

    #[tokio::test]
    async fn test_undecodable_cells_are_reported() {
        use crate::drivers::{MemorySource, MemoryTable};

        let source = MemorySource::new().with_table(
            MemoryTable::new("t")
                .column("id", NativeType::Integer)
                .column("at", NativeType::DateTime)
                .primary_key(["id"])
                .undecoded("at", 1)
                .rows([
                    vec![Value::I32(1), Value::Null],
                    vec![Value::I32(2), Value::Null],
                ]),
        );
        let schema = schema(source.columns("t").await.unwrap());
        let table = materialize_table(&source, schema, SURROGATE_KEY).await.unwrap();

        assert_eq!(table.frame.len(), 2);
        let fallback: Vec<_> = table
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::CoercionFallback)
            .collect();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].column, "at");
        assert!(fallback[0].message.contains("1 undecodable"));
    }

    #[test]
    fn test_coercion() {
        assert_eq!(
            coerce_column(&[Value::I16(1), Value::Null], ColumnType::Int64),
            Some(vec![Value::I64(1), Value::Null])
        );
        assert_eq!(
            coerce_column(&[Value::I16(1), Value::I16(0)], ColumnType::Boolean),
            Some(vec![Value::Bool(true), Value::Bool(false)])
        );
        assert_eq!(coerce_column(&[Value::I64(1 << 40)], ColumnType::Int32), None);
        assert_eq!(
            coerce_column(&[Value::Decimal(rust_decimal::Decimal::new(15, 1))], ColumnType::Float64),
            Some(vec![Value::F64(1.5)])
        );
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let schema = schema(vec![ColumnDef::new("id", "int", Some(NativeType::Integer))]);
        let err = build_frame(schema, vec![vec![]], SURROGATE_KEY).unwrap_err();
        assert!(matches!(err, IngestError::Materialize { .. }));
    }
}
