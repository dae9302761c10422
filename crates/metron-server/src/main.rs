//! Metron Daemon
//!
//! Command line entry point for the Metron metrics engine. Runs the engine
//! with scheduled retention, imports points in bulk, and answers
//! aggregation and administration commands against a data directory.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use clap::{Parser, Subcommand};
use metron_common::{MetronConfig, MetronError, Result};
use metron_server::{import_file, load_config, ConfigOverrides, QueryArgs};
use metron_timeseries::{CancellationToken, MetricsEngine};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;

/// Interval between stats lines while serving.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Parser)]
#[command(name = "metrond")]
#[command(author = "AutomataNexus Development Team")]
#[command(version = "0.1.0")]
#[command(about = "Metron metrics engine", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistence (in-memory when omitted)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Days of history to keep
    #[arg(long, global = true)]
    retention_days: Option<u32>,

    /// Keep points indefinitely
    #[arg(long, global = true)]
    no_retention: bool,

    /// Largest accepted batch
    #[arg(long, global = true)]
    max_batch_size: Option<usize>,

    /// Do not fsync the point log after each write
    #[arg(long, global = true)]
    no_sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with scheduled retention until interrupted
    Serve,
    /// Import points from a JSON lines file
    Import {
        file: PathBuf,
        /// Points per batch (capped at the configured limit)
        #[arg(short, long, default_value = "1000")]
        batch_size: usize,
    },
    /// Run an aggregation query
    Query {
        /// Metric names; repeat or separate with commas
        #[arg(short, long, required = true)]
        metric: Vec<String>,
        /// sum, avg, min, max or count
        #[arg(short, long, default_value = "avg")]
        function: String,
        /// minute, hour, day or Ns
        #[arg(short, long, default_value = "hour")]
        width: String,
        /// Range start (RFC 3339)
        #[arg(long)]
        from: Option<String>,
        /// Range end (RFC 3339, defaults to now)
        #[arg(long)]
        to: Option<String>,
        /// Trailing window such as 30m, 2h or 7d
        #[arg(long)]
        last: Option<String>,
    },
    /// List metrics
    Metrics,
    /// Delete a metric and all of its points
    Delete { name: String },
    /// Run one retention sweep now
    Sweep,
    /// Show engine and storage statistics
    Stats,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error [{}]: {}", e.kind().code(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = ConfigOverrides {
        data_dir: cli.data_dir.clone(),
        retention_days: cli.retention_days,
        no_retention: cli.no_retention,
        max_batch_size: cli.max_batch_size,
        no_sync: cli.no_sync,
    };
    let config = load_config(cli.config.as_deref(), &overrides)?;
    let engine = open_engine(config)?;

    let outcome = execute(&engine, cli.command).await;
    let closed = engine.shutdown().await;
    outcome.and(closed)
}

fn open_engine(config: MetronConfig) -> Result<MetricsEngine> {
    match &config.storage.data_directory {
        Some(dir) => tracing::info!("Persistence enabled, data directory: {}", dir.display()),
        None => tracing::warn!(
            "No data directory specified, running in-memory only (data will be lost on exit)"
        ),
    }
    MetricsEngine::open(config)
}

async fn execute(engine: &MetricsEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Serve => serve(engine).await,
        Commands::Import { file, batch_size } => {
            let cancel = cancel_on_signal();
            let summary = import_file(engine, &file, batch_size, &cancel).await?;
            print_json(&summary)
        }
        Commands::Query {
            metric,
            function,
            width,
            from,
            to,
            last,
        } => {
            let args = QueryArgs {
                metrics: metric,
                function,
                width,
                from,
                to,
                last,
            };
            let query = args.build(chrono::Utc::now())?;
            let cancel = cancel_on_signal();
            let result = engine.aggregate(&query, &cancel).await?;
            print_json(&result)
        }
        Commands::Metrics => print_json(&engine.list_metrics().await?),
        Commands::Delete { name } => {
            let deleted = engine.delete_metric(&name).await?;
            print_json(&serde_json::json!({ "metric": name, "points_deleted": deleted }))
        }
        Commands::Sweep => match engine.sweep_now().await {
            Some(report) => print_json(&report),
            None => Err(MetronError::Storage(
                "a retention sweep is already running".to_string(),
            )),
        },
        Commands::Stats => print_json(&engine.stats()),
    }
}

// =============================================================================
// Serve
// =============================================================================

async fn serve(engine: &MetricsEngine) -> Result<()> {
    let scheduled = engine.start_retention();
    tracing::info!(
        "Metron engine running (retention {})",
        if scheduled { "scheduled" } else { "off" }
    );

    let mut stats_interval = tokio::time::interval(STATS_INTERVAL);
    stats_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = stats_interval.tick() => {
                let stats = engine.stats();
                tracing::info!(
                    "{} metrics, {} points, {} points ingested, {} queries",
                    stats.store.metrics,
                    stats.store.points,
                    stats.points_ingested,
                    stats.queries_executed
                );
            }
        }
    }

    tracing::info!("Shutdown signal received, stopping engine");
    Ok(())
}

/// A token cancelled by Ctrl+C or SIGTERM.
fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Interrupted, cancelling");
        child.cancel();
    });
    token
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| MetronError::InternalInvariantViolation(e.to_string()))?;
    println!("{}", text);
    Ok(())
}
