//! promingest CLI
//!
//! Command-line interface for the catalog:
//! - Apply schema migrations
//! - Ingest JSON batches of time series
//! - Inspect the catalog
//! - Manage chunk intervals

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use promingest::backend::{SchemaState, SqliteBackend};
use promingest::cache::MemoryCache;
use promingest::config::{generate_default_config, Config, LoggingConfig};
use promingest::ingest::Ingestor;
use promingest::series::TimeSeries;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "promingest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ingest Prometheus-style samples into a normalized label/series catalog")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Catalog database path, overrides the config
    #[arg(long, global = true)]
    pub db: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply pending schema migrations
    Migrate,

    /// Show schema state, catalog size and metrics
    Status,

    /// Ingest a JSON array of time series
    Ingest {
        /// Path to the batch file, "-" for stdin
        path: PathBuf,
    },

    /// Show or change chunk intervals
    ChunkInterval {
        #[command(subcommand)]
        action: ChunkIntervalAction,
    },
}

#[derive(Subcommand)]
pub enum ChunkIntervalAction {
    /// Show the effective interval of a metric, or the default
    Show { metric: Option<String> },

    /// Override the interval of a metric (e.g. 30m, 8h, 1d)
    Set { metric: String, interval: String },

    /// Remove the override of a metric
    Reset { metric: String },

    /// Change the default interval
    SetDefault { interval: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing config to {:?}", path))?;
                println!("Wrote default config to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    init_logging(&config.logging)?;
    tracing::debug!("promingest v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config { .. } => {}

        Commands::Migrate => {
            let backend = SqliteBackend::connect(&config.storage)?;
            let version = backend.migrate().await?;
            println!("Schema at version {}", version);
        }

        Commands::Status => print_status(&config).await?,

        Commands::Ingest { path } => {
            let content = if path.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin()).context("reading batch from stdin")?
            } else {
                std::fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?
            };
            let batch: Vec<TimeSeries> =
                serde_json::from_str(&content).context("parsing batch")?;

            let backend = Arc::new(SqliteBackend::open(&config.storage)?);
            let ingestor = Ingestor::new(backend, Arc::new(MemoryCache::new()));
            let written = ingestor.ingest(&batch).await?;

            let stats = ingestor.cache().stats();
            println!(
                "Ingested {} samples from {} series ({} labels, {} series resolved)",
                written,
                batch.len(),
                stats.labels,
                stats.series
            );
        }

        Commands::ChunkInterval { action } => {
            let backend = SqliteBackend::open(&config.storage)?;
            match action {
                ChunkIntervalAction::Show { metric: Some(metric) } => {
                    let interval = backend.chunk_interval(&metric).await?;
                    println!("{}: {}", metric, format_interval(interval));
                }
                ChunkIntervalAction::Show { metric: None } => {
                    let interval = backend.default_chunk_interval().await?;
                    println!("default: {}", format_interval(interval));
                }
                ChunkIntervalAction::Set { metric, interval } => {
                    let interval = parse_interval(&interval)?;
                    let table = backend.set_metric_chunk_interval(&metric, interval).await?;
                    println!(
                        "{} (table {}): {}",
                        metric,
                        table.table_name,
                        format_interval(interval)
                    );
                }
                ChunkIntervalAction::Reset { metric } => {
                    backend.reset_metric_chunk_interval(&metric).await?;
                    let interval = backend.chunk_interval(&metric).await?;
                    println!("{}: {} (default)", metric, format_interval(interval));
                }
                ChunkIntervalAction::SetDefault { interval } => {
                    let interval = parse_interval(&interval)?;
                    backend.set_default_chunk_interval(interval).await?;
                    println!("default: {}", format_interval(interval));
                }
            }
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("promingest={}", config.level))
    });

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {:?}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init(),
    }

    Ok(())
}

async fn print_status(config: &Config) -> anyhow::Result<()> {
    let db_path = config.storage.resolved_db_path();
    println!("promingest v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Database: {}", db_path.display());

    // Opening a connection would create the file
    let state = if db_path.exists() {
        let backend = SqliteBackend::connect(&config.storage)?;
        backend.schema_state().await?.map(|state| (backend, state))
    } else {
        None
    };

    let backend = match state {
        None => {
            println!("Schema: not initialized");
            println!();
            println!("Initialize it with:");
            println!("  promingest migrate");
            return Ok(());
        }
        Some((backend, SchemaState { version, dirty })) => {
            println!(
                "Schema: version {}{}",
                version,
                if dirty { " (dirty)" } else { "" }
            );
            backend
        }
    };

    if let Err(e) = backend.check_schema().await {
        println!();
        println!("Catalog unavailable: {}", e);
        return Ok(());
    }

    let stats = backend.catalog_stats().await?;
    println!("Catalog: {}", stats);
    println!(
        "Default chunk interval: {}",
        format_interval(backend.default_chunk_interval().await?)
    );

    let metrics = backend.list_metrics().await?;
    if metrics.is_empty() {
        println!();
        println!("No metrics ingested yet.");
        return Ok(());
    }

    println!();
    println!("{:<40} {:<40} {:>10} {}", "Metric", "Table", "Rows", "Interval");
    println!("{}", "-".repeat(100));
    for metric in metrics {
        let rows = backend.row_count(&metric.metric_name).await?;
        let interval = metric
            .chunk_interval
            .map(format_interval)
            .unwrap_or_else(|| "default".to_string());
        println!(
            "{:<40} {:<40} {:>10} {}",
            metric.metric_name, metric.table.table_name, rows, interval
        );
    }

    Ok(())
}

/// Parse an interval such as `500ms`, `90s`, `30m`, `8h` or `1d`
fn parse_interval(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim().to_lowercase();

    let (digits, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60 * 1000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600 * 1000)
    } else if let Some(days) = s.strip_suffix('d') {
        (days, 86400 * 1000)
    } else {
        bail!("Invalid interval format: {}. Use: 500ms, 90s, 30m, 8h, 1d", s);
    };

    let count: u64 = digits
        .parse()
        .with_context(|| format!("Invalid interval: {}", s))?;
    count
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .with_context(|| format!("Interval too large: {}", s))
}

fn format_interval(interval: Duration) -> String {
    let seconds = interval.as_secs();
    if interval.subsec_millis() != 0 || seconds == 0 {
        format!("{}ms", interval.as_millis())
    } else if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_status_leaves_missing_database_alone() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("catalog.db");
        let mut config = Config::default();
        config.storage.db_path = db_path.to_string_lossy().to_string();

        print_status(&config).await.unwrap();
        assert!(!db_path.exists());
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_interval(" 8H ").unwrap(), Duration::from_secs(8 * 3600));
        assert_eq!(parse_interval("1d").unwrap(), Duration::from_secs(86400));

        assert!(parse_interval("8").is_err());
        assert!(parse_interval("xh").is_err());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_interval(Duration::from_secs(45)), "45s");
        assert_eq!(format_interval(Duration::from_secs(8 * 3600)), "8h 0m");
        assert_eq!(format_interval(Duration::from_secs(86400 + 3600)), "1d 1h");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["promingest", "chunk-interval", "set", "cpu", "1h"]);
        assert!(matches!(
            cli.command,
            Commands::ChunkInterval {
                action: ChunkIntervalAction::Set { .. }
            }
        ));

        let cli = Cli::parse_from(["promingest", "--db", "/tmp/x.db", "status"]);
        assert_eq!(cli.db.as_deref(), Some("/tmp/x.db"));
    }
}
