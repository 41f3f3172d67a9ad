//! Configuration validation.

use super::Config;
use crate::drivers::common::SslMode;
use crate::error::{IngestError, Result};
use crate::typemap::Dialect;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let conn = &config.dataset.connection;

    // Connection validation
    match &conn.url {
        Some(url) => {
            if url.trim().is_empty() {
                return Err(IngestError::Config(
                    "dataset.connection.url must not be empty".into(),
                ));
            }
            conn.endpoint()?;
        }
        None => {
            if conn.dialect.is_empty() {
                return Err(IngestError::Config(
                    "dataset.connection.dialect is required when no url is given".into(),
                ));
            }
            if Dialect::parse(&conn.dialect).is_none() {
                return Err(IngestError::Config(format!(
                    "dataset.connection.dialect must be one of mysql, mariadb, postgres, postgresql, got '{}'",
                    conn.dialect
                )));
            }
            if conn.host.is_empty() {
                return Err(IngestError::Config(
                    "dataset.connection.host is required".into(),
                ));
            }
            if conn.database.is_empty() {
                return Err(IngestError::Config(
                    "dataset.connection.database is required".into(),
                ));
            }
            if conn.user.is_empty() {
                return Err(IngestError::Config(
                    "dataset.connection.user is required".into(),
                ));
            }
        }
    }

    SslMode::parse(&conn.ssl_mode)?;

    for (table, column) in &config.dataset.time_col_dict {
        if table.is_empty() || column.is_empty() {
            return Err(IngestError::Config(
                "dataset.time_col_dict entries must name a table and a column".into(),
            ));
        }
    }

    if let Some(splits) = &config.dataset.splits {
        if splits.val_timestamp > splits.test_timestamp {
            return Err(IngestError::Config(
                "dataset.splits.val_timestamp must not be after test_timestamp".into(),
            ));
        }
    }

    // Build options
    if config.build.max_connections == 0 {
        return Err(IngestError::Config(
            "build.max_connections must be at least 1".into(),
        ));
    }

    Ok(())
}
