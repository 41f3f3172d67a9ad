//! Dataset builder - main workflow coordinator.
//!
//! A build runs connect, inspect, materialize every table, re-index every
//! foreign key, assemble, then post-process. Materialization finishes for
//! all tables before any re-indexing starts, and the source is closed on
//! every exit path.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::traits::SchemaSource;
use crate::dataset::Dataset;
use crate::drivers::SourceImpl;
use crate::error::Result;
use crate::inspector::{Inspector, Scheme};
use crate::materialize::{materialize_table, surrogate_key_name, MaterializedTable};
use crate::postprocess;
use crate::reindex::{reindex_all, strip_original_keys};

/// Builds a [`Dataset`] from one source database.
pub struct DatasetBuilder {
    config: Config,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub table_count: usize,
    pub checked_at: DateTime<Utc>,
}

impl DatasetBuilder {
    /// Create a builder for a validated configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Override the key retention flag of the dataset configuration.
    pub fn keep_original_keys(mut self, keep: bool) -> Self {
        self.config.dataset.keep_original_keys = keep;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect to the configured source and build the dataset.
    pub async fn build(&self) -> Result<Dataset> {
        let source = SourceImpl::connect(&self.config.dataset.connection, &self.config.build).await?;
        self.build_with(source).await
    }

    /// Build from an already opened source, closing it afterwards.
    ///
    /// The source is closed whether or not the build succeeds.
    pub async fn build_with<S: SchemaSource>(&self, source: S) -> Result<Dataset> {
        let result = self.build_from(&source).await;
        source.close().await;
        result
    }

    /// Run the build pipeline against a borrowed source.
    pub async fn build_from<S: SchemaSource + ?Sized>(&self, source: &S) -> Result<Dataset> {
        let started = Instant::now();
        let dataset_config = &self.config.dataset;
        info!("Building dataset from {} source", source.db_type());

        // Phase 1: inspect
        let inspector = Inspector::new(source);
        let schemas = inspector.schemas().await?;
        let surrogate = surrogate_key_name(&schemas);
        info!(
            "Inspected {} tables (surrogate key column: {})",
            schemas.len(),
            surrogate
        );

        // Phase 2: materialize every table before any re-indexing
        let concurrency = self.config.build.read_concurrency();
        let mut tables: Vec<MaterializedTable> = stream::iter(schemas)
            .map(|schema| materialize_table(source, schema, &surrogate))
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;
        tables.sort_by(|a, b| a.schema.name.cmp(&b.schema.name));
        info!(
            "Materialized {} tables ({} rows) with concurrency {}",
            tables.len(),
            tables.iter().map(|t| t.frame.len()).sum::<usize>(),
            concurrency
        );

        // Phase 3: re-index against the complete snapshot
        let mut reindexed = reindex_all(tables, &surrogate)?;

        // Phase 4: optional key stripping, only after every join ran
        if !dataset_config.keep_original_keys {
            for table in &mut reindexed {
                strip_original_keys(table, &surrogate);
            }
            debug!("Stripped original key columns");
        }

        // Phase 5: assemble and post-process
        let dataset = Dataset::assemble(reindexed, &surrogate, &dataset_config.time_col_dict)?
            .with_build_info(self.config.hash(), dataset_config.splits);
        let dataset = postprocess::apply_all(&dataset_config.post_process, dataset)?;

        for (table, column) in dataset.dangling_time_cols() {
            warn!("Temporal column {}.{} does not exist", table, column);
        }

        info!(
            "Built dataset: {} tables, {} rows, {} diagnostics in {:.2}s",
            dataset.tables().len(),
            dataset.total_rows(),
            dataset.diagnostics().len(),
            started.elapsed().as_secs_f64()
        );
        Ok(dataset)
    }

    /// Type scheme of the configured source, without reading any data.
    pub async fn scheme(&self) -> Result<Scheme> {
        let source = SourceImpl::connect(&self.config.dataset.connection, &self.config.build).await?;
        let result = Self::scheme_from(&source).await;
        source.close().await;
        result
    }

    /// Type scheme of an open source.
    pub async fn scheme_from<S: SchemaSource + ?Sized>(source: &S) -> Result<Scheme> {
        Inspector::new(source).scheme().await
    }

    /// Connect, list tables, and report.
    ///
    /// Connection failures are reported in the result rather than returned.
    pub async fn health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = async {
            let source =
                SourceImpl::connect(&self.config.dataset.connection, &self.config.build).await?;
            let tables = source.table_names().await;
            source.close().await;
            tables
        }
        .await;
        let source_latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(tables) => HealthCheckResult {
                healthy: true,
                source_connected: true,
                source_latency_ms,
                source_error: None,
                table_count: tables.len(),
                checked_at: Utc::now(),
            },
            Err(e) => HealthCheckResult {
                healthy: false,
                source_connected: false,
                source_latency_ms,
                source_error: Some(e.to_string()),
                table_count: 0,
                checked_at: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, DatasetConfig};
    use crate::drivers::{MemorySource, MemoryTable};
    use crate::core::value::Value;
    use crate::typemap::NativeType;

    fn builder(keep: bool) -> DatasetBuilder {
        let conn = ConnectionConfig {
            dialect: "mysql".into(),
            host: "localhost".into(),
            user: "u".into(),
            database: "db".into(),
            ..Default::default()
        };
        DatasetBuilder::new(Config::for_dataset(DatasetConfig::new(conn))).keep_original_keys(keep)
    }

    #[tokio::test]
    async fn test_scheme_from_reads_no_rows() {
        let source = MemorySource::new().with_table(
            MemoryTable::new("a")
                .column("id", NativeType::Integer)
                .row(vec![Value::I32(1)]),
        );
        let scheme = DatasetBuilder::scheme_from(&source).await.unwrap();
        assert_eq!(scheme["a"]["id"], Some(NativeType::Integer));
        assert_eq!(source.read_count(), 0);
    }

    #[tokio::test]
    async fn test_build_with_closes_source() {
        let source = MemorySource::new().with_table(
            MemoryTable::new("a")
                .column("id", NativeType::Integer)
                .primary_key(["id"])
                .row(vec![Value::I32(1)]),
        );
        let handle = source.clone();
        let dataset = builder(false).build_with(source).await.unwrap();
        assert!(handle.is_closed());
        assert_eq!(dataset.table("a").unwrap().len(), 1);
    }
}
