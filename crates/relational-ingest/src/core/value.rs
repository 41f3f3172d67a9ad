//! Cell values held by materialized frames.
//!
//! Values are owned: a frame outlives the read that produced it, so there is
//! no borrowing from driver buffers at this layer.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing value. Also the sentinel for orphaned references and
    /// unparseable temporal cells.
    Null,

    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),

    /// Fixed-point numeric as read from the source.
    Decimal(Decimal),

    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),

    /// Raw date as read from the source, not yet parsed.
    Date(NaiveDate),

    /// Raw datetime as read from the source, not yet parsed.
    DateTime(NaiveDateTime),

    Time(NaiveTime),
    Interval(Duration),

    /// Parsed point in time within the nanosecond-representable range.
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Time(_) => "time",
            Value::Interval(_) => "interval",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Integer view of the value, if it holds an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(i64::from(*v)),
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::F32(v) => integral_f64(f64::from(*v)),
            Value::F64(v) => integral_f64(*v),
            Value::Decimal(v) if v.fract().is_zero() => v.to_i64(),
            _ => None,
        }
    }

    /// Floating point view of a numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I16(v) => Some(f64::from(*v)),
            Value::I32(v) => Some(f64::from(*v)),
            Value::I64(v) => Some(*v as f64),
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            Value::Decimal(v) => v.to_f64(),
            _ => None,
        }
    }

    /// Point-in-time view of the value.
    ///
    /// Dates become midnight; text is parsed with the common ISO layouts.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::DateTime(dt) | Value::Timestamp(dt) => Some(*dt),
            Value::Text(s) => parse_datetime_text(s),
            _ => None,
        }
    }

    /// Duration view of the value.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Value::Interval(d) => Some(*d),
            Value::Time(t) => Some(t.signed_duration_since(NaiveTime::from_hms_opt(0, 0, 0)?)),
            other => other
                .as_f64()
                .filter(|s| s.is_finite())
                .and_then(|s| Duration::try_milliseconds((s * 1000.0).round() as i64)),
        }
    }

    /// Hashable projection used for equality joins.
    ///
    /// Returns `None` for values that never match anything (NULL and NaN).
    pub fn join_key(&self) -> Option<JoinKey> {
        let key = match self {
            Value::Null => return None,
            Value::Bool(v) => JoinKey::Bool(*v),
            Value::I16(_) | Value::I32(_) | Value::I64(_) => JoinKey::Int(self.as_i64()?),
            Value::F32(v) => float_key(f64::from(*v))?,
            Value::F64(v) => float_key(*v)?,
            Value::Decimal(v) => match self.as_i64() {
                Some(i) => JoinKey::Int(i),
                None => JoinKey::Decimal(v.normalize()),
            },
            Value::Text(s) => JoinKey::Text(s.clone()),
            Value::Bytes(b) => JoinKey::Bytes(b.clone()),
            Value::Uuid(u) => JoinKey::Uuid(*u),
            Value::Date(_) | Value::DateTime(_) | Value::Timestamp(_) => {
                JoinKey::DateTime(self.as_datetime()?)
            }
            Value::Time(t) => JoinKey::Time(*t),
            Value::Interval(d) => JoinKey::Interval(*d),
        };
        Some(key)
    }
}

/// Hashable, normalized form of a non-null [`Value`].
///
/// Integers of every width and integral floats or decimals share the `Int`
/// representation so that an `INT` column joins against a `BIGINT` one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinKey {
    Bool(bool),
    Int(i64),
    /// Bit pattern of a finite, non-integral float.
    Float(u64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Interval(Duration),
}

fn integral_f64(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn float_key(v: f64) -> Option<JoinKey> {
    if v.is_nan() {
        return None;
    }
    Some(match integral_f64(v) {
        Some(i) => JoinKey::Int(i),
        None => JoinKey::Float(v.to_bits()),
    })
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

fn parse_datetime_text(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Whether a datetime fits the signed 64-bit nanosecond range used for
/// parsed timestamps (roughly 1677-09-21 to 2262-04-11).
pub fn in_timestamp_range(dt: &NaiveDateTime) -> bool {
    dt.and_utc().timestamp_nanos_opt().is_some()
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
