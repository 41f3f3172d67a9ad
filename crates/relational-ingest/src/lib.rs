//! # relational-ingest
//!
//! Turns a relational database into an in-memory multi-table dataset for
//! relational machine learning.
//!
//! A build discovers every table, column, primary key and foreign key of the
//! source database, reads each table once, gives every row a dense integer
//! surrogate key, and rewrites every foreign key (composite ones included)
//! into a single column holding the referenced row's surrogate key.
//!
//! - **MySQL/MariaDB** sources via SQLx, **PostgreSQL** via deadpool-postgres
//! - **Order-preserving** hash equi-joins; orphaned references become NULL
//! - **Diagnostics** for unsupported types and unparseable values
//! - **Registry** of public relational benchmark datasets
//!
//! ## Example
//!
//! ```rust,no_run
//! use relational_ingest::{registry, Config, DatasetBuilder};
//!
//! #[tokio::main]
//! async fn main() -> relational_ingest::Result<()> {
//!     let config = Config::for_dataset(registry::builtin("ctu-tpch")?);
//!     let dataset = DatasetBuilder::new(config).build().await?;
//!     for (name, table) in dataset.tables() {
//!         println!("{}: {} rows, fks {:?}", name, table.len(), table.fkey_col_to_pkey_table());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dataset;
pub mod drivers;
pub mod error;
pub mod inspector;
pub mod materialize;
pub mod orchestrator;
pub mod postprocess;
pub mod registry;
pub mod reindex;
pub mod typemap;

// Re-exports for convenient access
pub use config::{BuildOptions, Config, ConnectionConfig, DatasetConfig, SplitTimestamps};
pub use core::{
    ColumnDef, Diagnostic, DiagnosticKind, ForeignKeyDef, Frame, FrameColumn, PrimaryKeyDef,
    SchemaSource, TableRows, TableSchema, Value,
};
pub use dataset::{Dataset, DatasetSummary, Table, TableSummary};
pub use drivers::{MemorySource, MemoryTable, SourceImpl};
pub use error::{IngestError, Result};
pub use inspector::{Inspector, MetadataCache, Scheme};
pub use orchestrator::{DatasetBuilder, HealthCheckResult};
pub use postprocess::Step;
pub use typemap::{ColumnType, NativeType};
