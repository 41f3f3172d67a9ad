//! MySQL/MariaDB source implementation.
//!
//! Catalog lookups go through `INFORMATION_SCHEMA`; data is read with one
//! `SELECT` per table over an SQLx pool.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::Endpoint;
use crate::core::schema::{ColumnDef, ForeignKeyDef, PrimaryKeyDef};
use crate::core::traits::{SchemaSource, TableRows};
use crate::core::value::Value;
use crate::drivers::common::SslMode;
use crate::error::{IngestError, Result};
use crate::typemap::{classify, Dialect};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL/MariaDB schema source.
pub struct MysqlSource {
    pool: MySqlPool,
    database: String,
}

impl MysqlSource {
    /// Open a pool against the endpoint and check it answers.
    pub async fn new(endpoint: &Endpoint, ssl_mode: SslMode, max_conns: usize) -> Result<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .database(&endpoint.database)
            .username(&endpoint.user)
            .ssl_mode(ssl_mode.to_mysql());
        if !endpoint.password.is_empty() {
            options = options.password(&endpoint.password);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns.max(1) as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| IngestError::connection(e, "creating MySQL source pool"))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| IngestError::connection(e, "testing MySQL source connection"))?;

        info!(
            "Connected to MySQL source: {}:{}/{}",
            endpoint.host, endpoint.port, endpoint.database
        );

        Ok(Self {
            pool,
            database: endpoint.database.clone(),
        })
    }

    /// Quote a MySQL identifier.
    fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    /// Convert a MySQL row to values, one per requested column.
    ///
    /// Cells that fail to decode (zero dates, out-of-range times) become NULL
    /// instead of failing the table, and are counted in `failures`.
    fn row_to_values(row: &MySqlRow, columns: &[ColumnDef], failures: &mut [usize]) -> Vec<Value> {
        columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let (is_null, unsigned) = match row.try_get_raw(i) {
                    Ok(raw) => (raw.is_null(), raw.type_info().name().ends_with("UNSIGNED")),
                    Err(_) => (true, false),
                };
                if is_null {
                    return Value::Null;
                }
                let value = Self::decode(row, i, &col.data_type.to_lowercase(), unsigned);
                if value.is_null() {
                    failures[i] += 1;
                }
                value
            })
            .collect()
    }

    fn decode(row: &MySqlRow, i: usize, data_type: &str, unsigned: bool) -> Value {
        match (data_type, unsigned) {
            ("tinyint", false) => match row.try_get::<i8, _>(i) {
                Ok(v) => Value::I16(v as i16),
                Err(_) => row.try_get::<bool, _>(i).map(Value::Bool).unwrap_or(Value::Null),
            },
            ("tinyint", true) => match row.try_get::<u8, _>(i) {
                Ok(v) => Value::I16(v as i16),
                Err(_) => row.try_get::<bool, _>(i).map(Value::Bool).unwrap_or(Value::Null),
            },
            ("smallint", false) => row.try_get::<i16, _>(i).map(Value::I16).unwrap_or(Value::Null),
            ("smallint", true) => row
                .try_get::<u16, _>(i)
                .map(|v| Value::I32(v as i32))
                .unwrap_or(Value::Null),
            ("mediumint" | "int" | "integer", false) => {
                row.try_get::<i32, _>(i).map(Value::I32).unwrap_or(Value::Null)
            }
            ("mediumint", true) => row
                .try_get::<u32, _>(i)
                .map(|v| Value::I32(v as i32))
                .unwrap_or(Value::Null),
            ("int" | "integer", true) => row
                .try_get::<u32, _>(i)
                .map(|v| Value::I64(v as i64))
                .unwrap_or(Value::Null),
            ("bigint", false) => row.try_get::<i64, _>(i).map(Value::I64).unwrap_or(Value::Null),
            ("bigint", true) => match row.try_get::<u64, _>(i) {
                Ok(v) => i64::try_from(v)
                    .map(Value::I64)
                    .unwrap_or_else(|_| Value::Decimal(v.into())),
                Err(_) => Value::Null,
            },
            ("year", _) => row
                .try_get::<u16, _>(i)
                .map(|v| Value::I16(v as i16))
                .unwrap_or(Value::Null),

            ("float", _) => row.try_get::<f32, _>(i).map(Value::F32).unwrap_or(Value::Null),
            ("double" | "real", _) => row.try_get::<f64, _>(i).map(Value::F64).unwrap_or(Value::Null),
            ("decimal" | "numeric", _) => row
                .try_get::<rust_decimal::Decimal, _>(i)
                .map(Value::Decimal)
                .unwrap_or(Value::Null),

            ("bit" | "boolean" | "bool", _) => match row.try_get::<bool, _>(i) {
                Ok(v) => Value::Bool(v),
                Err(_) => row
                    .try_get::<u64, _>(i)
                    .map(|v| Value::Bool(v != 0))
                    .unwrap_or(Value::Null),
            },

            ("char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set", _) => {
                row.try_get::<String, _>(i).map(Value::Text).unwrap_or(Value::Null)
            }

            ("binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob", _) => row
                .try_get::<Vec<u8>, _>(i)
                .map(Value::Bytes)
                .unwrap_or(Value::Null),

            ("date", _) => row
                .try_get::<chrono::NaiveDate, _>(i)
                .map(Value::Date)
                .unwrap_or(Value::Null),
            ("time", _) => row
                .try_get::<chrono::NaiveTime, _>(i)
                .map(Value::Time)
                .unwrap_or(Value::Null),
            ("datetime" | "timestamp", _) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .map(Value::DateTime)
                .unwrap_or(Value::Null),

            // json, geometry and anything else unmapped: text when possible
            _ => match row.try_get::<String, _>(i) {
                Ok(s) => Value::Text(s),
                Err(_) => row
                    .try_get::<Vec<u8>, _>(i)
                    .map(|b| Value::Text(String::from_utf8_lossy(&b).into_owned()))
                    .unwrap_or(Value::Null),
            },
        }
    }
}

#[async_trait]
impl SchemaSource for MysqlSource {
    async fn table_names(&self) -> Result<Vec<String>> {
        // CAST to CHAR: information_schema may return VARBINARY under some collations
        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::connection(e, "listing MySQL tables"))?;

        let names = rows
            .iter()
            .map(|row| row.try_get::<String, _>("TABLE_NAME"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        info!("Found {} tables in MySQL database '{}'", names.len(), self.database);
        Ok(names)
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE,
                CAST(COLUMN_TYPE AS CHAR(1024)) AS COLUMN_TYPE,
                CAST(IF(IS_NULLABLE = 'YES', 1, 0) AS SIGNED) AS is_nullable,
                CAST(ORDINAL_POSITION AS SIGNED) AS ORDINAL_POSITION
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::connection(e, "loading MySQL columns"))?;

        if rows.is_empty() {
            return Err(IngestError::TableNotFound(table.to_string()));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let data_type: String = row.try_get("DATA_TYPE")?;
            let column_type: String = row.try_get("COLUMN_TYPE")?;
            columns.push(ColumnDef {
                name: row.try_get("COLUMN_NAME")?,
                native: classify(Dialect::Mysql, &data_type, &column_type),
                data_type,
                nullable: row.try_get::<i64, _>("is_nullable")? == 1,
                ordinal_pos: row.try_get::<i64, _>("ORDINAL_POSITION")? as i32,
            });
        }

        debug!("Loaded {} columns for {}", columns.len(), table);
        Ok(columns)
    }

    async fn primary_key(&self, table: &str) -> Result<Option<PrimaryKeyDef>> {
        let query = r#"
            SELECT CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::connection(e, "loading MySQL primary key"))?;

        let columns = rows
            .iter()
            .map(|row| row.try_get::<String, _>("COLUMN_NAME"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(PrimaryKeyDef::new(columns))
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>> {
        let query = r#"
            SELECT
                CAST(rc.CONSTRAINT_NAME AS CHAR(255)) AS CONSTRAINT_NAME,
                CAST(kcu.COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(kcu.REFERENCED_TABLE_NAME AS CHAR(255)) AS REFERENCED_TABLE_NAME,
                CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR(255)) AS REFERENCED_COLUMN_NAME
            FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
                AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                AND rc.TABLE_NAME = kcu.TABLE_NAME
            WHERE rc.CONSTRAINT_SCHEMA = ? AND rc.TABLE_NAME = ?
            ORDER BY rc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::connection(e, "loading MySQL foreign keys"))?;

        // Group by constraint name, keeping catalog order
        let mut foreign_keys: Vec<ForeignKeyDef> = Vec::new();
        for row in rows {
            let name: String = row.try_get("CONSTRAINT_NAME")?;
            let column: String = row.try_get("COLUMN_NAME")?;
            let ref_table: String = row.try_get("REFERENCED_TABLE_NAME")?;
            let ref_column: String = row.try_get("REFERENCED_COLUMN_NAME")?;

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

        debug!("Loaded {} foreign keys for {}", foreign_keys.len(), table);
        Ok(foreign_keys)
    }

    async fn read_table(&self, table: &str, columns: &[ColumnDef]) -> Result<TableRows> {
        if columns.is_empty() {
            return Ok(TableRows::default());
        }
        let col_list = columns
            .iter()
            .map(|c| Self::quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM {}", col_list, Self::quote_ident(table));

        let rows: Vec<MySqlRow> = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::materialize(table, e.to_string()))?;

        debug!("Read {} rows from {}", rows.len(), table);
        let mut failures = vec![0; columns.len()];
        let values = rows
            .iter()
            .map(|row| Self::row_to_values(row, columns, &mut failures))
            .collect();
        Ok(TableRows::new(values).with_failures(columns, &failures))
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
