//! tsview command-line tool
//!
//! # Commands
//!
//! - `check-config` - Validate configuration, optionally pinging the cache
//! - `inspect` - Classify a Parquet file and report its sampling frequency
//! - `aggregate` - Downsample a Parquet file and print the resulting view
//!
//! # Configuration
//!
//! Read from `--config`, else `TSVIEW_CONFIG`, else `./tsview.toml` when it
//! exists, else defaults. `TSVIEW_*` environment variables override the file.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tsview::{
    aggregate::RangeAggregator,
    config::Config,
    frequency::estimate_frequency,
    model::{Dataset, TimeSeriesView},
    redis::{util::sanitize_url, HealthStatus, RedisConfig, RedisPool},
    storage::read_parquet,
};

// =============================================================================
// CLI Definition
// =============================================================================

/// tsview - frequency-aware views over time-series datasets
#[derive(Parser)]
#[command(name = "tsview")]
#[command(version)]
#[command(about = "Frequency inference, downsampling and cached views for time-series tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (overrides TSVIEW_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration
    CheckConfig {
        /// Also check that the cache server answers
        #[arg(long)]
        ping: bool,
    },

    /// Show column classification, frequency and irregularities of a file
    Inspect {
        /// Parquet file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Downsample a file into a view and print it as JSON
    Aggregate {
        /// Parquet file
        file: PathBuf,

        /// Point budget (defaults to the configured one)
        #[arg(short, long)]
        max_points: Option<usize>,

        /// Series columns to include (defaults to all)
        #[arg(short, long)]
        series: Vec<String>,
    },
}

// =============================================================================
// Configuration
// =============================================================================

fn config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    if let Ok(path) = std::env::var("TSVIEW_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from("tsview.toml");
    local.exists().then_some(local)
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Validate configuration and print summary
async fn cmd_check_config(config: &Config, ping: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Configuration is valid!");
    println!();
    println!("Cache Settings:");
    println!("  Enabled: {}", config.cache.enabled);
    println!("  URL: {}", sanitize_url(&config.cache.url));
    println!("  Pool size: {}", config.cache.pool_size);
    println!("  Entry TTL: {}s", config.cache.entry_ttl_secs);
    println!();
    println!("Aggregation:");
    println!("  Max points: {}", config.aggregation.max_points);
    println!();
    println!("Storage:");
    println!("  Data directory: {:?}", config.storage.data_dir);
    println!("  Load timeout: {}ms", config.storage.load_timeout_ms);
    println!();
    println!("Log level: {}", config.server.log_level);

    if ping && config.cache.enabled {
        let pool = RedisPool::lazy(RedisConfig::from(&config.cache))?;
        let status = pool.health_check().await;
        println!();
        println!("Cache health: {:?}", status);
        let metrics = pool.metrics();
        println!("  Connections created: {}", metrics.connections_created);
        println!("  Connection failures: {}", metrics.connection_failures);
        println!("  Commands executed: {}", metrics.commands_executed);
        println!("  Command failures: {}", metrics.command_failures);
        println!("  Retries: {}", metrics.retries);
        println!("  Average latency: {:.0}us", metrics.average_latency_us);
        if status == HealthStatus::Unhealthy {
            return Err("cache server is unreachable".into());
        }
    }
    Ok(())
}

/// Classify a file and report its frequency
fn cmd_inspect(file: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let table = read_parquet(file)?;
    let dataset = Dataset::from_table(&table, &file_stem(file))?;
    let tscol = dataset.tscol()?;
    let estimate = estimate_frequency(table.temporal_values(tscol)?);
    debug!("Frequency estimate for {}: {:?}", tscol, estimate);

    if format == "json" {
        let report = serde_json::json!({
            "dataset": dataset,
            "timestamp_column": tscol,
            "frequency_secs": estimate.period.map(|p| p.num_seconds()),
            "distinct_deltas": estimate.distinct_deltas,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Dataset: {}", dataset.name);
    println!("  Rows: {}", dataset.max_length);
    println!("  Series columns: {}", dataset.series_cols.join(", "));
    println!("  Timestamp columns: {}", dataset.timestamp_cols.join(", "));
    println!("  Other columns: {}", dataset.other_cols.join(", "));
    println!();
    println!("Timestamp column: {}", tscol);
    match estimate.period {
        Some(period) => println!("  Frequency: {}", period),
        None => println!(
            "  Frequency: undetermined ({} distinct deltas)",
            estimate.distinct_deltas
        ),
    }
    if dataset.conditions.is_empty() {
        println!("  Conditions: none");
    } else {
        let conditions: Vec<String> = dataset.conditions.iter().map(|c| c.to_string()).collect();
        println!("  Conditions: {}", conditions.join(", "));
    }
    Ok(())
}

/// Downsample a file and print the view
fn cmd_aggregate(
    config: &Config,
    file: &Path,
    max_points: Option<usize>,
    series: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let table = read_parquet(file)?;
    let dataset = Dataset::from_table(&table, &file_stem(file))?;
    let tscol = dataset.tscol()?;

    let series = if series.is_empty() {
        dataset.series_cols.clone()
    } else {
        series.to_vec()
    };

    let aggregator = RangeAggregator::new(max_points.unwrap_or(config.aggregation.max_points));
    let aggregated = aggregator.aggregate(&table, tscol)?;
    info!(
        "Aggregated {} rows into {} (budget {})",
        table.num_rows(),
        aggregated.num_rows(),
        aggregator.max_points()
    );

    let view = TimeSeriesView::from_table(&dataset.id, &dataset.name, &aggregated, tscol, &series)?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(config_path(&cli).as_deref())?;
    init_tracing(&config);

    match &cli.command {
        Commands::CheckConfig { ping } => cmd_check_config(&config, *ping).await,
        Commands::Inspect { file, format } => cmd_inspect(file, format),
        Commands::Aggregate {
            file,
            max_points,
            series,
        } => cmd_aggregate(&config, file, *max_points, series),
    }
}
