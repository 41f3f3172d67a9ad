//! Error types for the ingestion library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connectivity failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for schema inconsistencies and catalog lookup failures.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code for failed table reads.
pub const EXIT_MATERIALIZE_ERROR: u8 = 4;
/// Exit code for failed post-processing steps.
pub const EXIT_POST_PROCESS_ERROR: u8 = 5;
/// Exit code for an unknown registry dataset.
pub const EXIT_UNKNOWN_DATASET: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for dataset builds.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection or pool error with context
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// MySQL/MariaDB query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// PostgreSQL query error
    #[error("Source database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A table disappeared or was never visible to the catalog
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// A column referenced by name does not exist in a table
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// The catalog describes relationships the engine cannot honour
    #[error("Schema inconsistency: {0}")]
    SchemaInconsistency(String),

    /// Column lengths or names inside a frame disagree
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Reading or coercing a table failed
    #[error("Materialization failed for table {table}: {message}")]
    Materialize { table: String, message: String },

    /// A post-processing step failed
    #[error("Post-processing step '{step}' failed: {message}")]
    PostProcess { step: String, message: String },

    /// Dataset name not present in the registry
    #[error("Unknown dataset '{0}'. Use the `list` command to see available datasets.")]
    UnknownDataset(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        IngestError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Materialize error
    pub fn materialize(table: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Materialize {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a PostProcess error
    pub fn post_process(step: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::PostProcess {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            IngestError::Config(_) | IngestError::Yaml(_) | IngestError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            IngestError::Connection { .. } | IngestError::Source(_) | IngestError::Postgres(_) => {
                EXIT_CONNECTION_ERROR
            }
            IngestError::TableNotFound(_)
            | IngestError::ColumnNotFound(_)
            | IngestError::SchemaInconsistency(_) => EXIT_SCHEMA_ERROR,
            IngestError::InvalidFrame(_) | IngestError::Materialize { .. } => {
                EXIT_MATERIALIZE_ERROR
            }
            IngestError::PostProcess { .. } => EXIT_POST_PROCESS_ERROR,
            IngestError::UnknownDataset(_) => EXIT_UNKNOWN_DATASET,
            IngestError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(IngestError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            IngestError::connection("refused", "connecting").exit_code(),
            EXIT_CONNECTION_ERROR
        );
        assert_eq!(
            IngestError::SchemaInconsistency("x".into()).exit_code(),
            EXIT_SCHEMA_ERROR
        );
        assert_eq!(
            IngestError::UnknownDataset("nope".into()).exit_code(),
            EXIT_UNKNOWN_DATASET
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(IngestError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "config.yaml");
        let err = IngestError::from(io);
        let text = err.format_detailed();
        assert!(text.starts_with("Error: IO error: config.yaml"));
    }

    #[test]
    fn test_materialize_constructor() {
        let err = IngestError::materialize("orders", "bad value");
        assert_eq!(
            err.to_string(),
            "Materialization failed for table orders: bad value"
        );
    }
}
