//! Database driver implementations.
//!
//! - [`mysql`]: MySQL/MariaDB via SQLx
//! - [`postgres`]: PostgreSQL via deadpool-postgres
//! - [`memory`]: in-process tables for tests and fixtures
//! - [`common`]: shared TLS settings
//!
//! [`SourceImpl`] wraps the concrete sources in an enum so the builder can
//! hold any of them without boxing.

pub mod common;
pub mod memory;
pub mod mysql;
pub mod postgres;

pub use common::SslMode;
pub use memory::{MemorySource, MemoryTable};
pub use mysql::MysqlSource;
pub use postgres::PostgresSource;

use async_trait::async_trait;
use tracing::info;

use crate::config::{BuildOptions, ConnectionConfig};
use crate::core::schema::{ColumnDef, ForeignKeyDef, PrimaryKeyDef};
use crate::core::traits::{SchemaSource, TableRows};
use crate::error::Result;
use crate::typemap::Dialect;

/// Enum-based static dispatch over the supported sources.
pub enum SourceImpl {
    Mysql(MysqlSource),
    Postgres(PostgresSource),
    Memory(MemorySource),
}

impl SourceImpl {
    /// Connect to the database described by `conn`.
    ///
    /// The dialect picks the Rust driver; a `+driver` suffix in the URL
    /// scheme is informational only.
    pub async fn connect(conn: &ConnectionConfig, options: &BuildOptions) -> Result<Self> {
        let endpoint = conn.endpoint()?;
        let ssl_mode = SslMode::parse(&conn.ssl_mode)?;
        info!("Connecting to {}", conn.redacted_url());

        match endpoint.dialect {
            Dialect::Mysql => Ok(SourceImpl::Mysql(
                MysqlSource::new(&endpoint, ssl_mode, options.max_connections).await?,
            )),
            Dialect::Postgres => Ok(SourceImpl::Postgres(
                PostgresSource::new(&endpoint, &conn.schema, ssl_mode, options.max_connections)
                    .await?,
            )),
        }
    }
}

impl From<MemorySource> for SourceImpl {
    fn from(source: MemorySource) -> Self {
        SourceImpl::Memory(source)
    }
}

#[async_trait]
impl SchemaSource for SourceImpl {
    async fn table_names(&self) -> Result<Vec<String>> {
        match self {
            SourceImpl::Mysql(s) => s.table_names().await,
            SourceImpl::Postgres(s) => s.table_names().await,
            SourceImpl::Memory(s) => s.table_names().await,
        }
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        match self {
            SourceImpl::Mysql(s) => s.columns(table).await,
            SourceImpl::Postgres(s) => s.columns(table).await,
            SourceImpl::Memory(s) => s.columns(table).await,
        }
    }

    async fn primary_key(&self, table: &str) -> Result<Option<PrimaryKeyDef>> {
        match self {
            SourceImpl::Mysql(s) => s.primary_key(table).await,
            SourceImpl::Postgres(s) => s.primary_key(table).await,
            SourceImpl::Memory(s) => s.primary_key(table).await,
        }
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>> {
        match self {
            SourceImpl::Mysql(s) => s.foreign_keys(table).await,
            SourceImpl::Postgres(s) => s.foreign_keys(table).await,
            SourceImpl::Memory(s) => s.foreign_keys(table).await,
        }
    }

    async fn read_table(&self, table: &str, columns: &[ColumnDef]) -> Result<TableRows> {
        match self {
            SourceImpl::Mysql(s) => s.read_table(table, columns).await,
            SourceImpl::Postgres(s) => s.read_table(table, columns).await,
            SourceImpl::Memory(s) => s.read_table(table, columns).await,
        }
    }

    fn db_type(&self) -> &str {
        match self {
            SourceImpl::Mysql(s) => s.db_type(),
            SourceImpl::Postgres(s) => s.db_type(),
            SourceImpl::Memory(s) => s.db_type(),
        }
    }

    async fn close(&self) {
        match self {
            SourceImpl::Mysql(s) => s.close().await,
            SourceImpl::Postgres(s) => s.close().await,
            SourceImpl::Memory(s) => s.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_dispatch() {
        let memory = MemorySource::new().with_table(MemoryTable::new("a"));
        let handle = memory.clone();
        let source = SourceImpl::from(memory);
        assert_eq!(source.db_type(), "memory");
        assert_eq!(source.table_names().await.unwrap(), vec!["a".to_string()]);
        source.close().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_dialect() {
        let conn = ConnectionConfig {
            dialect: "sqlite".into(),
            host: "localhost".into(),
            ..Default::default()
        };
        let result = SourceImpl::connect(&conn, &BuildOptions::default()).await;
        assert!(matches!(result, Err(crate::error::IngestError::Config(_))));
    }
}
