//! Post-processing steps applied to an assembled dataset.
//!
//! Each [`Step`] consumes a [`Dataset`] and returns a new one. Steps are
//! listed in the dataset configuration and run once, in order, after
//! assembly:
//!
//! ```yaml
//! post_process:
//!   - step: drop_columns
//!     table: part
//!     columns: [p_partkey]
//!   - step: shift_years
//!     table: voyages
//!     columns: [departure_date]
//!     years: 100
//!     min_year: 1678
//! ```

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::diagnostic::{Diagnostic, DiagnosticKind};
use crate::core::frame::{Frame, FrameColumn};
use crate::core::value::{in_timestamp_range, Value};
use crate::dataset::{Dataset, Table};
use crate::error::{IngestError, Result};
use crate::reindex::{fk_column_name, resolve_foreign_key, unique_column_name};
use crate::typemap::ColumnType;

/// Substring replacement applied to an inlined column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// One dataset transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Remove whole tables.
    DropTables { tables: Vec<String> },

    /// Remove columns from one table.
    DropColumns { table: String, columns: Vec<String> },

    /// Coerce columns to timestamps; unparseable cells become NULL.
    ParseDatetime { table: String, columns: Vec<String> },

    /// Add `years` to every date; results before `min_year` become NULL.
    ShiftYears {
        table: String,
        columns: Vec<String>,
        years: i32,
        min_year: i32,
    },

    /// Turn offsets (seconds or time-of-day) into timestamps from `origin`.
    AddEpochOffset {
        table: String,
        columns: Vec<String>,
        origin: NaiveDate,
    },

    /// Derive one duration column from hour, minute and second columns.
    CombineDuration {
        table: String,
        hours: String,
        minutes: String,
        seconds: String,
        into: String,
    },

    /// Re-index a foreign key the catalog does not declare.
    AddForeignKey {
        table: String,
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
    },

    /// Replace every foreign key into `ref_table` with the referenced
    /// row's `value_column`.
    ///
    /// The new column is named after the foreign key column with `prefix`
    /// stripped and `rename` applied.
    InlineReference {
        ref_table: String,
        value_column: String,
        prefix: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rename: Option<Rename>,
    },
}

impl Step {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Step::DropTables { .. } => "drop_tables",
            Step::DropColumns { .. } => "drop_columns",
            Step::ParseDatetime { .. } => "parse_datetime",
            Step::ShiftYears { .. } => "shift_years",
            Step::AddEpochOffset { .. } => "add_epoch_offset",
            Step::CombineDuration { .. } => "combine_duration",
            Step::AddForeignKey { .. } => "add_foreign_key",
            Step::InlineReference { .. } => "inline_reference",
        }
    }

    /// Apply this step.
    pub fn apply(&self, mut dataset: Dataset) -> Result<Dataset> {
        debug!("Applying post-processing step {}", self.name());
        match self {
            Step::DropTables { tables } => {
                for table in tables {
                    take(self, &mut dataset, table)?;
                }
                Ok(dataset)
            }

            Step::DropColumns { table, columns } => {
                map_table(self, dataset, table, |mut frame| {
                    for column in columns {
                        if frame.remove_column(column).is_none() {
                            return Err(missing_column(self, table, column));
                        }
                    }
                    Ok(frame)
                })
            }

            Step::ParseDatetime { table, columns } => {
                map_table(self, dataset, table, |frame| {
                    map_columns(self, frame, table, columns, ColumnType::Timestamp, |v| {
                        v.as_datetime()
                            .filter(in_timestamp_range)
                            .map_or(Value::Null, Value::Timestamp)
                    })
                })
            }

            Step::ShiftYears {
                table,
                columns,
                years,
                min_year,
            } => map_table(self, dataset, table, |frame| {
                map_columns(self, frame, table, columns, ColumnType::Timestamp, |v| {
                    shift_years(v, *years, *min_year)
                })
            }),

            Step::AddEpochOffset {
                table,
                columns,
                origin,
            } => {
                let Some(origin) = origin.and_hms_opt(0, 0, 0) else {
                    return Err(IngestError::post_process(self.name(), "invalid origin"));
                };
                map_table(self, dataset, table, |frame| {
                    map_columns(self, frame, table, columns, ColumnType::Timestamp, |v| {
                        v.as_duration()
                            .and_then(|d| origin.checked_add_signed(d))
                            .filter(in_timestamp_range)
                            .map_or(Value::Null, Value::Timestamp)
                    })
                })
            }

            Step::CombineDuration {
                table,
                hours,
                minutes,
                seconds,
                into,
            } => map_table(self, dataset, table, |mut frame| {
                let parts = [hours, minutes, seconds]
                    .into_iter()
                    .map(|c| {
                        frame
                            .column(c)
                            .ok_or_else(|| missing_column(self, table, c))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let values = (0..frame.len())
                    .map(|row| {
                        combine_duration(
                            &parts[0].values[row],
                            &parts[1].values[row],
                            &parts[2].values[row],
                        )
                    })
                    .collect();
                frame.set_column(FrameColumn::new(into, ColumnType::Timedelta, values))?;
                Ok(frame)
            }),

            Step::AddForeignKey {
                table,
                columns,
                ref_table,
                ref_columns,
            } => {
                let target = dataset
                    .table(ref_table)
                    .ok_or_else(|| missing_table(self, ref_table))?;
                let source = dataset
                    .table(table)
                    .ok_or_else(|| missing_table(self, table))?;

                let resolved = resolve_foreign_key(
                    (table, source.frame(), columns),
                    (ref_table, target.frame(), ref_columns),
                    target.pkey_col(),
                )
                .map_err(|e| IngestError::post_process(self.name(), e.to_string()))?;

                let base = fk_column_name(ref_table, columns);
                let name = unique_column_name(&base, |c| source.frame().contains(c));
                if resolved.orphans > 0 {
                    info!(
                        "{} rows of {} reference no row of {} via {}",
                        resolved.orphans, table, ref_table, name
                    );
                }

                let source = take(self, &mut dataset, table)?;
                let source = source
                    .map_frame(|mut frame| {
                        frame.push_column(FrameColumn::new(
                            &name,
                            ColumnType::Int64,
                            resolved.values,
                        ))?;
                        Ok(frame)
                    })?
                    .with_fkey(&name, ref_table)?;
                dataset.insert_table(table, source);
                Ok(dataset)
            }

            Step::InlineReference {
                ref_table,
                value_column,
                prefix,
                rename,
            } => {
                let target = dataset
                    .table(ref_table)
                    .ok_or_else(|| missing_table(self, ref_table))?;
                let lookup = ReferenceLookup::new(self, ref_table, target, value_column)?;

                let referencing: Vec<(String, Vec<String>)> = dataset
                    .tables()
                    .iter()
                    .filter(|(name, _)| *name != ref_table)
                    .map(|(name, table)| {
                        let fks = table
                            .fkey_col_to_pkey_table()
                            .iter()
                            .filter(|(_, target)| *target == ref_table)
                            .map(|(col, _)| col.clone())
                            .collect::<Vec<_>>();
                        (name.clone(), fks)
                    })
                    .filter(|(_, fks)| !fks.is_empty())
                    .collect();

                for (name, fks) in referencing {
                    let mut table = take(self, &mut dataset, &name)?;
                    for fk in fks {
                        let inlined = inlined_name(&fk, prefix, rename.as_ref());
                        // An existing column of that name is replaced.
                        if inlined != fk && table.frame().contains(&inlined) {
                            warn!(
                                "Inlining {}.{} replaces existing column {}",
                                name, fk, inlined
                            );
                            dataset.push_diagnostic(Diagnostic::new(
                                DiagnosticKind::NameCollision,
                                &name,
                                &inlined,
                                format!("replaced by values inlined from {}", fk),
                            ));
                        }
                        table = table.without_fkey(&fk).map_frame(|mut frame| {
                            let column = frame
                                .remove_column(&fk)
                                .ok_or_else(|| missing_column(self, &name, &fk))?;
                            frame.set_column(lookup.resolve(&inlined, &column.values))?;
                            Ok(frame)
                        })?;
                        debug!("Inlined {}.{} as {}", name, fk, inlined);
                    }
                    dataset.insert_table(name, table);
                }
                Ok(dataset)
            }
        }
    }
}

/// Run steps once, in order.
pub fn apply_all(steps: &[Step], dataset: Dataset) -> Result<Dataset> {
    if !steps.is_empty() {
        info!("Applying {} post-processing steps", steps.len());
    }
    steps.iter().try_fold(dataset, |dataset, step| step.apply(dataset))
}

fn missing_table(step: &Step, table: &str) -> IngestError {
    IngestError::post_process(step.name(), format!("unknown table '{}'", table))
}

fn missing_column(step: &Step, table: &str, column: &str) -> IngestError {
    IngestError::post_process(step.name(), format!("unknown column '{}.{}'", table, column))
}

fn take(step: &Step, dataset: &mut Dataset, table: &str) -> Result<Table> {
    dataset
        .take_table(table)
        .ok_or_else(|| missing_table(step, table))
}

fn map_table<F>(step: &Step, mut dataset: Dataset, table: &str, f: F) -> Result<Dataset>
where
    F: FnOnce(Frame) -> Result<Frame>,
{
    let mapped = take(step, &mut dataset, table)?.map_frame(f)?;
    dataset.insert_table(table, mapped);
    Ok(dataset)
}

fn map_columns<F>(
    step: &Step,
    mut frame: Frame,
    table: &str,
    columns: &[String],
    dtype: ColumnType,
    f: F,
) -> Result<Frame>
where
    F: Fn(&Value) -> Value,
{
    for name in columns {
        let column = frame
            .column(name)
            .ok_or_else(|| missing_column(step, table, name))?;
        let values = column
            .values
            .iter()
            .map(|v| if v.is_null() { Value::Null } else { f(v) })
            .collect();
        frame.set_column(FrameColumn::new(name, dtype, values))?;
    }
    Ok(frame)
}

fn shift_years(value: &Value, years: i32, min_year: i32) -> Value {
    let Some(dt) = value.as_datetime() else {
        return Value::Null;
    };
    let year = dt.year() + years;
    if year < min_year {
        return Value::Null;
    }
    dt.with_year(year)
        .filter(in_timestamp_range)
        .map_or(Value::Null, Value::Timestamp)
}

fn combine_duration(hours: &Value, minutes: &Value, seconds: &Value) -> Value {
    let parts = (hours.as_f64(), minutes.as_f64(), seconds.as_f64());
    let (Some(h), Some(m), Some(s)) = parts else {
        return Value::Null;
    };
    let total = h * 3600.0 + m * 60.0 + s;
    if !total.is_finite() {
        return Value::Null;
    }
    Duration::try_milliseconds((total * 1000.0).round() as i64).map_or(Value::Null, Value::Interval)
}

fn inlined_name(fk: &str, prefix: &str, rename: Option<&Rename>) -> String {
    let stripped = fk.strip_prefix(prefix).unwrap_or(fk);
    match rename {
        Some(r) => stripped.replace(&r.from, &r.to),
        None => stripped.to_string(),
    }
}

/// Surrogate key to value lookup over a referenced table.
struct ReferenceLookup {
    dtype: ColumnType,
    by_key: HashMap<i64, Value>,
}

impl ReferenceLookup {
    fn new(step: &Step, name: &str, table: &Table, value_column: &str) -> Result<Self> {
        let frame = table.frame();
        let keys = frame
            .column(table.pkey_col())
            .ok_or_else(|| missing_column(step, name, table.pkey_col()))?;
        let values = frame
            .column(value_column)
            .ok_or_else(|| missing_column(step, name, value_column))?;

        let by_key = keys
            .values
            .iter()
            .zip(&values.values)
            .filter_map(|(k, v)| Some((k.as_i64()?, v.clone())))
            .collect();
        Ok(Self {
            dtype: values.dtype,
            by_key,
        })
    }

    fn resolve(&self, name: &str, keys: &[Value]) -> FrameColumn {
        let values = keys
            .iter()
            .map(|k| {
                k.as_i64()
                    .and_then(|k| self.by_key.get(&k))
                    .map_or(Value::Null, Value::clone)
            })
            .collect();
        FrameColumn::new(name, self.dtype, values)
    }
}

/// Midnight of a date, for configuration defaults.
pub fn midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}
