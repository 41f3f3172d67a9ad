//! PostgreSQL source implementation.
//!
//! Uses deadpool-postgres for pooling. Types tokio-postgres cannot decode
//! directly (enums, intervals, extension types) are converted in the SELECT
//! list so every cell arrives as a supported wire type.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::{Config as PgConfig, Row};
use tracing::{debug, info, warn};

use crate::config::Endpoint;
use crate::core::schema::{ColumnDef, ForeignKeyDef, PrimaryKeyDef};
use crate::core::traits::{SchemaSource, TableRows};
use crate::core::value::Value;
use crate::drivers::common::{postgres_connector, SslMode};
use crate::error::{IngestError, Result};
use crate::typemap::{classify, Dialect, NativeType};

/// How a column is selected and decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadKind {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Numeric,
    Text,
    Bytes,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
    Time,
    /// Selected as seconds (`EXTRACT(EPOCH ...)`).
    IntervalSecs,
    /// Selected with a `::text` cast.
    CastText,
}

impl ReadKind {
    fn for_column(col: &ColumnDef) -> Self {
        match col.data_type.as_str() {
            "bool" => ReadKind::Bool,
            "int2" => ReadKind::I16,
            "int4" => ReadKind::I32,
            "int8" => ReadKind::I64,
            "float4" => ReadKind::F32,
            "float8" => ReadKind::F64,
            "numeric" => ReadKind::Numeric,
            "bpchar" | "varchar" | "text" | "name" | "char" => ReadKind::Text,
            "bytea" => ReadKind::Bytes,
            "uuid" => ReadKind::Uuid,
            "date" => ReadKind::Date,
            "timestamp" => ReadKind::Timestamp,
            "timestamptz" => ReadKind::TimestampTz,
            "time" | "timetz" => ReadKind::Time,
            "interval" => ReadKind::IntervalSecs,
            _ => ReadKind::CastText,
        }
    }

    fn select_expr(self, quoted: &str) -> String {
        match self {
            ReadKind::IntervalSecs => format!("EXTRACT(EPOCH FROM {})::float8", quoted),
            ReadKind::Time => format!("{}::time", quoted),
            ReadKind::CastText => format!("{}::text", quoted),
            _ => quoted.to_string(),
        }
    }
}

/// PostgreSQL schema source.
pub struct PostgresSource {
    pool: Pool,
    schema: String,
}

impl PostgresSource {
    /// Open a pool against the endpoint and check it answers.
    pub async fn new(
        endpoint: &Endpoint,
        schema: &str,
        ssl_mode: SslMode,
        max_conns: usize,
    ) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&endpoint.host);
        pg_config.port(endpoint.port);
        pg_config.dbname(&endpoint.database);
        pg_config.user(&endpoint.user);
        if !endpoint.password.is_empty() {
            pg_config.password(&endpoint.password);
        }
        pg_config.ssl_mode(ssl_mode.to_postgres());

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match postgres_connector(ssl_mode)? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns.max(1))
                    .build()
                    .map_err(|e| IngestError::connection(e, "creating PostgreSQL source pool"))?
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns.max(1))
                    .build()
                    .map_err(|e| IngestError::connection(e, "creating PostgreSQL source pool"))?
            }
        };

        let source = Self {
            pool,
            schema: schema.to_string(),
        };
        let client = source.client("testing PostgreSQL source connection").await?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL source: {}:{}/{}",
            endpoint.host, endpoint.port, endpoint.database
        );
        Ok(source)
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| IngestError::connection(e, context))
    }

    /// Quote a PostgreSQL identifier.
    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Decode one cell. `None` means the cell was not NULL but could not be
    /// decoded.
    fn decode(row: &Row, i: usize, kind: ReadKind) -> Option<Value> {
        fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
            row: &'a Row,
            i: usize,
        ) -> Option<Option<T>> {
            row.try_get::<_, Option<T>>(i).ok()
        }

        match kind {
            ReadKind::Bool => get::<bool>(row, i).map(|v| v.map(Value::Bool).into()),
            ReadKind::I16 => get::<i16>(row, i).map(|v| v.map(Value::I16).into()),
            ReadKind::I32 => get::<i32>(row, i).map(|v| v.map(Value::I32).into()),
            ReadKind::I64 => get::<i64>(row, i).map(|v| v.map(Value::I64).into()),
            ReadKind::F32 => get::<f32>(row, i).map(|v| v.map(Value::F32).into()),
            ReadKind::F64 => get::<f64>(row, i).map(|v| v.map(Value::F64).into()),
            ReadKind::Numeric => {
                get::<rust_decimal::Decimal>(row, i).map(|v| v.map(Value::Decimal).into())
            }
            ReadKind::Text | ReadKind::CastText => {
                get::<String>(row, i).map(|v| v.map(Value::Text).into())
            }
            ReadKind::Bytes => get::<Vec<u8>>(row, i).map(|v| v.map(Value::Bytes).into()),
            ReadKind::Uuid => get::<uuid::Uuid>(row, i).map(|v| v.map(Value::Uuid).into()),
            ReadKind::Date => get::<NaiveDate>(row, i).map(|v| v.map(Value::Date).into()),
            ReadKind::Timestamp => {
                get::<NaiveDateTime>(row, i).map(|v| v.map(Value::DateTime).into())
            }
            ReadKind::TimestampTz => get::<DateTime<Utc>>(row, i)
                .map(|v| v.map(|dt| Value::DateTime(dt.naive_utc())).into()),
            ReadKind::Time => get::<NaiveTime>(row, i).map(|v| v.map(Value::Time).into()),
            ReadKind::IntervalSecs => match get::<f64>(row, i)? {
                None => Some(Value::Null),
                Some(secs) => interval_from_secs(secs).map(Value::Interval),
            },
        }
    }
}

/// Interval from `EXTRACT(EPOCH ...)` seconds, at microsecond precision.
fn interval_from_secs(secs: f64) -> Option<chrono::Duration> {
    let micros = (secs * 1e6).round();
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(chrono::Duration::microseconds(micros as i64))
}

#[async_trait]
impl SchemaSource for PostgresSource {
    async fn table_names(&self) -> Result<Vec<String>> {
        let client = self.client("getting connection for table_names").await?;
        let rows = client
            .query(
                r#"
                SELECT table_name::text
                FROM information_schema.tables
                WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                ORDER BY table_name
                "#,
                &[&self.schema],
            )
            .await?;

        let names = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        info!("Found {} tables in PostgreSQL schema '{}'", names.len(), self.schema);
        Ok(names)
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        let client = self.client("getting connection for columns").await?;
        let rows = client
            .query(
                r#"
                SELECT
                    c.column_name::text,
                    c.udt_name::text,
                    c.is_nullable = 'YES',
                    c.ordinal_position::int4,
                    EXISTS (
                        SELECT 1 FROM pg_catalog.pg_type t
                        JOIN pg_catalog.pg_namespace tn ON tn.oid = t.typnamespace
                        WHERE t.typname = c.udt_name
                          AND tn.nspname = c.udt_schema
                          AND t.typtype = 'e'
                    ) AS is_enum
                FROM information_schema.columns c
                WHERE c.table_schema = $1 AND c.table_name = $2
                ORDER BY c.ordinal_position
                "#,
                &[&self.schema, &table],
            )
            .await?;

        if rows.is_empty() {
            return Err(IngestError::TableNotFound(table.to_string()));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let udt_name: String = row.try_get(1)?;
            let is_enum: bool = row.try_get(4)?;
            let native = if is_enum {
                Some(NativeType::Enum)
            } else {
                classify(Dialect::Postgres, &udt_name, "")
            };
            columns.push(ColumnDef {
                name: row.try_get(0)?,
                data_type: udt_name,
                native,
                nullable: row.try_get(2)?,
                ordinal_pos: row.try_get(3)?,
            });
        }

        debug!("Loaded {} columns for {}.{}", columns.len(), self.schema, table);
        Ok(columns)
    }

    async fn primary_key(&self, table: &str) -> Result<Option<PrimaryKeyDef>> {
        let client = self.client("getting connection for primary_key").await?;
        let rows = client
            .query(
                r#"
                SELECT a.attname::text
                FROM pg_catalog.pg_index i
                JOIN pg_catalog.pg_class t ON t.oid = i.indrelid
                JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
                CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_catalog.pg_attribute a
                    ON a.attrelid = i.indrelid AND a.attnum = k.attnum
                WHERE i.indisprimary AND n.nspname = $1 AND t.relname = $2
                ORDER BY k.ord
                "#,
                &[&self.schema, &table],
            )
            .await?;

        let columns = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(PrimaryKeyDef::new(columns))
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>> {
        let client = self.client("getting connection for foreign_keys").await?;

        // conkey/confkey are parallel arrays; unnest them together so
        // composite keys keep their column pairing.
        let rows = client
            .query(
                r#"
                SELECT
                    con.conname::text,
                    a.attname::text,
                    rt.relname::text,
                    ra.attname::text
                FROM pg_catalog.pg_constraint con
                JOIN pg_catalog.pg_class t ON t.oid = con.conrelid
                JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
                JOIN pg_catalog.pg_class rt ON rt.oid = con.confrelid
                CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
                    WITH ORDINALITY AS k(attnum, ref_attnum, ord)
                JOIN pg_catalog.pg_attribute a
                    ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                JOIN pg_catalog.pg_attribute ra
                    ON ra.attrelid = con.confrelid AND ra.attnum = k.ref_attnum
                WHERE con.contype = 'f' AND n.nspname = $1 AND t.relname = $2
                ORDER BY con.conname, k.ord
                "#,
                &[&self.schema, &table],
            )
            .await?;

        let mut foreign_keys: Vec<ForeignKeyDef> = Vec::new();
        for row in rows {
            let name: String = row.try_get(0)?;
            let column: String = row.try_get(1)?;
            let ref_table: String = row.try_get(2)?;
            let ref_column: String = row.try_get(3)?;

            match foreign_keys.iter_mut().find(|fk| fk.name == name) {
                Some(fk) => {
                    fk.columns.push(column);
                    fk.ref_columns.push(ref_column);
                }
                None => foreign_keys.push(ForeignKeyDef {
                    name,
                    columns: vec![column],
                    ref_table,
                    ref_columns: vec![ref_column],
                }),
            }
        }

        debug!(
            "Loaded {} foreign keys for {}.{}",
            foreign_keys.len(),
            self.schema,
            table
        );
        Ok(foreign_keys)
    }

    async fn read_table(&self, table: &str, columns: &[ColumnDef]) -> Result<TableRows> {
        if columns.is_empty() {
            return Ok(TableRows::default());
        }
        let kinds: Vec<ReadKind> = columns.iter().map(ReadKind::for_column).collect();
        let col_list = columns
            .iter()
            .zip(&kinds)
            .map(|(c, kind)| kind.select_expr(&Self::quote_ident(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}.{}",
            col_list,
            Self::quote_ident(&self.schema),
            Self::quote_ident(table)
        );

        let client = self.client("getting connection for read_table").await?;
        let rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| IngestError::materialize(table, e.to_string()))?;

        debug!("Read {} rows from {}.{}", rows.len(), self.schema, table);
        let mut failures = vec![0; columns.len()];
        let values = rows
            .iter()
            .map(|row| {
                kinds
                    .iter()
                    .enumerate()
                    .map(|(i, kind)| {
                        Self::decode(row, i, *kind).unwrap_or_else(|| {
                            failures[i] += 1;
                            Value::Null
                        })
                    })
                    .collect()
            })
            .collect();
        Ok(TableRows::new(values).with_failures(columns, &failures))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(udt: &str) -> ColumnDef {
        ColumnDef::new("c", udt, classify(Dialect::Postgres, udt, ""))
    }

    #[test]
    fn test_read_kind_casts_unsupported_types() {
        assert_eq!(ReadKind::for_column(&col("int8")), ReadKind::I64);
        assert_eq!(ReadKind::for_column(&col("jsonb")), ReadKind::CastText);
        assert_eq!(
            ReadKind::CastText.select_expr("\"c\""),
            "\"c\"::text"
        );
        assert_eq!(
            ReadKind::IntervalSecs.select_expr("\"c\""),
            "EXTRACT(EPOCH FROM \"c\")::float8"
        );
    }

    #[test]
    fn test_interval_from_secs() {
        assert_eq!(
            interval_from_secs(3723.5),
            Some(chrono::Duration::milliseconds(3_723_500))
        );
        assert_eq!(
            interval_from_secs(-0.000_002),
            Some(chrono::Duration::microseconds(-2))
        );
        assert_eq!(interval_from_secs(f64::NAN), None);
        assert_eq!(interval_from_secs(1e300), None);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(PostgresSource::quote_ident("Order"), "\"Order\"");
        assert_eq!(PostgresSource::quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
