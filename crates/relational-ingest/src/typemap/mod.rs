//! Native-to-in-memory column type mapping.
//!
//! Catalog type names are first classified into a dialect-independent
//! [`NativeType`] category, which is then mapped through a fixed table to the
//! in-memory [`ColumnType`] used by frames. Unrecognized catalog types classify
//! to `None`; the mapping never fails.

use serde::{Deserialize, Serialize};

use crate::core::value::Value;

/// Generic category of a column type as reported by the source catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeType {
    BigInteger,
    Integer,
    SmallInteger,
    Boolean,
    Float,
    Double,
    Numeric,
    String,
    Text,
    Unicode,
    UnicodeText,
    LargeBinary,
    Date,
    DateTime,
    Time,
    Interval,
    Enum,
    Uuid,
}

/// In-memory column type category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int64,
    Int32,
    Int16,
    Boolean,
    Float64,
    Categorical,
    String,
    /// Parsed point in time (nanosecond-representable range).
    Timestamp,
    /// Parsed duration.
    Timedelta,
    /// Untyped values kept exactly as read.
    Object,
}

/// Map a native category to its in-memory category.
///
/// Temporal, interval, binary and UUID columns stay untyped at this layer;
/// the materializer parses date and datetime columns afterwards.
pub fn map_native(native: NativeType) -> ColumnType {
    match native {
        NativeType::BigInteger => ColumnType::Int64,
        NativeType::Integer => ColumnType::Int32,
        NativeType::SmallInteger => ColumnType::Int16,
        NativeType::Boolean => ColumnType::Boolean,
        NativeType::Float | NativeType::Double | NativeType::Numeric => ColumnType::Float64,
        NativeType::Enum => ColumnType::Categorical,
        NativeType::String | NativeType::Text | NativeType::Unicode | NativeType::UnicodeText => {
            ColumnType::String
        }
        NativeType::Date
        | NativeType::DateTime
        | NativeType::Time
        | NativeType::Interval
        | NativeType::LargeBinary
        | NativeType::Uuid => ColumnType::Object,
    }
}

/// Whether the materializer attempts timestamp parsing for this category.
pub fn is_temporal(native: NativeType) -> bool {
    matches!(native, NativeType::Date | NativeType::DateTime)
}

/// Source database dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Mysql,
    Postgres,
}

impl Dialect {
    /// Parse a dialect name (`mysql`, `mariadb`, `postgres`, `postgresql`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Dialect::Mysql),
            "postgres" | "postgresql" | "pg" => Some(Dialect::Postgres),
            _ => None,
        }
    }

    /// Dialect identifier.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }
}

/// Classify a catalog type into a native category.
///
/// `data_type` is the bare type name (`int`, `varchar`, `int4`), `column_type`
/// the full declaration where the catalog provides one (`tinyint(1) unsigned`).
pub fn classify(dialect: Dialect, data_type: &str, column_type: &str) -> Option<NativeType> {
    match dialect {
        Dialect::Mysql => classify_mysql(data_type, column_type),
        Dialect::Postgres => classify_postgres(data_type),
    }
}

fn classify_mysql(data_type: &str, column_type: &str) -> Option<NativeType> {
    let data_type = data_type.to_lowercase();
    let column_type = column_type.to_lowercase();
    // Unsigned integers widen one step so every value fits the signed category.
    let unsigned = column_type.contains("unsigned");

    match data_type.as_str() {
        "tinyint" if column_type.starts_with("tinyint(1)") => Some(NativeType::Boolean),
        "bit" if column_type == "bit(1)" || column_type == "bit" => Some(NativeType::Boolean),
        "bool" | "boolean" => Some(NativeType::Boolean),
        "tinyint" | "year" => Some(NativeType::SmallInteger),
        "smallint" | "mediumint" if unsigned => Some(NativeType::Integer),
        "smallint" => Some(NativeType::SmallInteger),
        "int" | "integer" if unsigned => Some(NativeType::BigInteger),
        "mediumint" | "int" | "integer" => Some(NativeType::Integer),
        "bigint" => Some(NativeType::BigInteger),
        "float" => Some(NativeType::Float),
        "double" | "real" | "double precision" => Some(NativeType::Double),
        "decimal" | "numeric" => Some(NativeType::Numeric),
        "char" | "varchar" => Some(NativeType::String),
        "tinytext" | "text" | "mediumtext" | "longtext" => Some(NativeType::Text),
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            Some(NativeType::LargeBinary)
        }
        "date" => Some(NativeType::Date),
        "datetime" | "timestamp" => Some(NativeType::DateTime),
        "time" => Some(NativeType::Time),
        "enum" => Some(NativeType::Enum),
        "uuid" => Some(NativeType::Uuid),
        _ => None,
    }
}

fn classify_postgres(udt_name: &str) -> Option<NativeType> {
    match udt_name.to_lowercase().as_str() {
        "int8" | "bigint" => Some(NativeType::BigInteger),
        "int4" | "integer" | "int" => Some(NativeType::Integer),
        "int2" | "smallint" => Some(NativeType::SmallInteger),
        "bool" | "boolean" => Some(NativeType::Boolean),
        "float4" | "real" => Some(NativeType::Float),
        "float8" | "double precision" => Some(NativeType::Double),
        "numeric" | "decimal" => Some(NativeType::Numeric),
        "bpchar" | "char" | "varchar" | "character varying" | "character" => {
            Some(NativeType::String)
        }
        "text" | "citext" => Some(NativeType::Text),
        "bytea" => Some(NativeType::LargeBinary),
        "date" => Some(NativeType::Date),
        "timestamp" | "timestamptz" => Some(NativeType::DateTime),
        "time" | "timetz" => Some(NativeType::Time),
        "interval" => Some(NativeType::Interval),
        "uuid" => Some(NativeType::Uuid),
        _ => None,
    }
}

/// Infer an in-memory type from the values of a column without a type hint.
///
/// A column whose non-null values all share one integer, float, boolean or
/// text representation gets that type; anything else stays untyped.
pub fn infer_column_type(values: &[Value]) -> ColumnType {
    let mut inferred: Option<ColumnType> = None;

    for value in values.iter().filter(|v| !v.is_null()) {
        let current = match value {
            Value::Bool(_) => ColumnType::Boolean,
            Value::I16(_) => ColumnType::Int16,
            Value::I32(_) => ColumnType::Int32,
            Value::I64(_) => ColumnType::Int64,
            Value::F32(_) | Value::F64(_) => ColumnType::Float64,
            Value::Text(_) => ColumnType::String,
            Value::Timestamp(_) => ColumnType::Timestamp,
            _ => return ColumnType::Object,
        };

        match inferred {
            None => inferred = Some(current),
            Some(existing) if existing == current => {}
            Some(_) => return ColumnType::Object,
        }
    }

    inferred.unwrap_or(ColumnType::Object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_native_integers() {
        assert_eq!(map_native(NativeType::BigInteger), ColumnType::Int64);
        assert_eq!(map_native(NativeType::Integer), ColumnType::Int32);
        assert_eq!(map_native(NativeType::SmallInteger), ColumnType::Int16);
    }

    #[test]
    fn test_map_native_opaque_types() {
        for native in [
            NativeType::Date,
            NativeType::DateTime,
            NativeType::Time,
            NativeType::Interval,
            NativeType::Uuid,
            NativeType::LargeBinary,
        ] {
            assert_eq!(map_native(native), ColumnType::Object, "{:?}", native);
        }
    }

    #[test]
    fn test_map_native_numeric_is_float() {
        assert_eq!(map_native(NativeType::Numeric), ColumnType::Float64);
        assert_eq!(map_native(NativeType::Float), ColumnType::Float64);
    }

    #[test]
    fn test_classify_mysql_boolean_tinyint() {
        assert_eq!(
            classify(Dialect::Mysql, "tinyint", "tinyint(1)"),
            Some(NativeType::Boolean)
        );
        assert_eq!(
            classify(Dialect::Mysql, "tinyint", "tinyint(4) unsigned"),
            Some(NativeType::SmallInteger)
        );
    }

    #[test]
    fn test_classify_mysql_unsigned_widens() {
        assert_eq!(
            classify(Dialect::Mysql, "int", "int(10) unsigned"),
            Some(NativeType::BigInteger)
        );
        assert_eq!(
            classify(Dialect::Mysql, "smallint", "smallint(5) unsigned"),
            Some(NativeType::Integer)
        );
        assert_eq!(
            classify(Dialect::Mysql, "int", "int(11)"),
            Some(NativeType::Integer)
        );
    }

    #[test]
    fn test_classify_unknown_types() {
        assert_eq!(classify(Dialect::Mysql, "geometry", "geometry"), None);
        assert_eq!(classify(Dialect::Mysql, "json", "json"), None);
        assert_eq!(classify(Dialect::Postgres, "jsonb", ""), None);
        assert_eq!(classify(Dialect::Postgres, "inet", ""), None);
    }

    #[test]
    fn test_classify_postgres() {
        assert_eq!(
            classify(Dialect::Postgres, "int8", ""),
            Some(NativeType::BigInteger)
        );
        assert_eq!(
            classify(Dialect::Postgres, "timestamptz", ""),
            Some(NativeType::DateTime)
        );
        assert_eq!(
            classify(Dialect::Postgres, "interval", ""),
            Some(NativeType::Interval)
        );
    }

    #[test]
    fn test_dialect_parse() {
        assert_eq!(Dialect::parse("MariaDB"), Some(Dialect::Mysql));
        assert_eq!(Dialect::parse("postgresql"), Some(Dialect::Postgres));
        assert_eq!(Dialect::parse("oracle"), None);
    }

    #[test]
    fn test_infer_column_type() {
        assert_eq!(
            infer_column_type(&[Value::I32(1), Value::Null, Value::I32(3)]),
            ColumnType::Int32
        );
        assert_eq!(
            infer_column_type(&[Value::I32(1), Value::Text("a".into())]),
            ColumnType::Object
        );
        assert_eq!(infer_column_type(&[Value::Null]), ColumnType::Object);
    }
}
