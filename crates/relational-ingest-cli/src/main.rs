//! relational-ingest CLI - build relational ML datasets from live databases.

use clap::{Parser, Subcommand};
use relational_ingest::{registry, Config, DatasetBuilder, IngestError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "relational-ingest")]
#[command(about = "Ingest a relational database into a re-indexed multi-table dataset")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Built-in dataset name (takes precedence over --config)
    #[arg(short, long)]
    dataset: Option<String>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in datasets
    List,

    /// Print the column type scheme without reading data
    Schema,

    /// Build the dataset and print its summary
    Build {
        /// Keep original primary and foreign key columns
        #[arg(long)]
        keep_original_keys: bool,
    },

    /// Test the source database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), IngestError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(registry::names())?);
            } else {
                for name in registry::names() {
                    println!("{}", name);
                }
            }
        }

        Commands::Schema => {
            let config = prepare(&cli)?;
            let scheme = DatasetBuilder::new(config).scheme().await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&scheme)?);
            } else {
                for (table, columns) in &scheme {
                    println!("{}", table);
                    for (column, native) in columns {
                        match native {
                            Some(native) => println!("  {:<32} {:?}", column, native),
                            None => println!("  {:<32} (unsupported)", column),
                        }
                    }
                }
            }
        }

        Commands::Build { keep_original_keys } => {
            let config = prepare(&cli)?;
            let mut builder = DatasetBuilder::new(config);
            if keep_original_keys {
                builder = builder.keep_original_keys(true);
            }
            let dataset = builder.build().await?;
            let summary = dataset.summary();

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                println!("\nBuild completed!");
                if let Some(hash) = &summary.config_hash {
                    println!("  Config: {}", &hash[..hash.len().min(12)]);
                }
                println!("  Tables: {}", summary.tables.len());
                println!("  Rows: {}", summary.total_rows);
                for table in &summary.tables {
                    println!(
                        "  - {} ({} rows, {} columns, pk {})",
                        table.name,
                        table.rows,
                        table.columns.len(),
                        table.primary_key
                    );
                    for (column, target) in &table.foreign_keys {
                        println!("      {} -> {}", column, target);
                    }
                    if let Some(time) = &table.time_column {
                        println!("      time column: {}", time);
                    }
                }
                if let Some(splits) = &summary.splits {
                    println!(
                        "  Splits: val {} / test {}",
                        splits.val_timestamp, splits.test_timestamp
                    );
                }
                if !summary.diagnostics.is_empty() {
                    println!("  Diagnostics:");
                    for diagnostic in &summary.diagnostics {
                        println!("    {}", diagnostic);
                    }
                }
            }
        }

        Commands::HealthCheck => {
            let config = prepare(&cli)?;
            let result = DatasetBuilder::new(config).health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms, {} tables)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms,
                    result.table_count
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(IngestError::connection(
                    "Health check failed",
                    "source database unreachable",
                ));
            }
        }
    }

    Ok(())
}

/// Install logging and resolve the configuration.
fn prepare(cli: &Cli) -> Result<Config, IngestError> {
    setup_logging(&cli.verbosity, &cli.log_format).map_err(IngestError::Config)?;
    load_config(cli)
}

/// Resolve the configuration: a built-in dataset wins over the config file.
fn load_config(cli: &Cli) -> Result<Config, IngestError> {
    let config = match &cli.dataset {
        Some(name) => {
            let config = Config::for_dataset(registry::builtin(name)?);
            config.validate()?;
            info!("Using built-in dataset {}", name);
            config
        }
        None => {
            let config = Config::load(&cli.config)?;
            info!("Loaded configuration from {:?}", cli.config);
            config
        }
    };
    info!("Source: {}", config.dataset.connection.redacted_url());
    Ok(config)
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
