// Reservoir Limiter - Main Entry Point
//
// Command-line driver for the reservoir limiter:
// - Simulate concurrent callers against a reservoir
// - Print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reservoir_limiter::config::Config;
use reservoir_limiter::{metrics, LimitError, Reservoir, ReservoirStats};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Reservoir: token-reservoir admission limiter
#[derive(Parser, Debug)]
#[command(name = "reservoir")]
#[command(version)]
#[command(about = "Admission limiter backed by a self-refilling token reservoir", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, default_value = "reservoir.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive concurrent callers against a reservoir and report the outcome
    Simulate {
        /// Number of concurrent callers
        #[arg(long, default_value_t = 10)]
        callers: usize,

        /// Reservoir capacity (overrides configuration)
        #[arg(long)]
        capacity: Option<usize>,

        /// Refill period in milliseconds (overrides configuration)
        #[arg(long)]
        refill_ms: Option<u64>,

        /// How long each caller waits before giving up, in milliseconds
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,

        /// Wait for the reservoir to refill and go idle before reporting
        #[arg(long)]
        wait_idle: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Append Prometheus metrics to the report (also enabled by
        /// `metrics.enabled` in the configuration)
        #[arg(long)]
        metrics: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Outcome of a simulation run
#[derive(Debug, Serialize)]
struct SimulationReport {
    callers: usize,
    admitted: usize,
    cancelled: usize,
    elapsed_ms: u64,
    stats: ReservoirStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_from_path(&args.config)?;
    init_tracing(&config, args.verbose)?;

    match args.command {
        Commands::Simulate {
            callers,
            capacity,
            refill_ms,
            timeout_ms,
            wait_idle,
            format,
            metrics: with_metrics,
        } => {
            let mut config = config;
            if let Some(capacity) = capacity {
                config.reservoir.capacity = capacity;
            }
            if let Some(refill_ms) = refill_ms {
                config.reservoir.refill_period_ms = refill_ms;
            }
            config.validate()?;

            let with_metrics = with_metrics || config.metrics.enabled;
            if with_metrics {
                metrics::init().context("Failed to register metrics")?;
            }

            let report = simulate(&config, callers, Duration::from_millis(timeout_ms), wait_idle)
                .await?;
            print_report(&report, format)?;

            if with_metrics {
                println!("{}", metrics::gather_metrics()?);
            }
        }
        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
    }

    Ok(())
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

/// Run `callers` concurrent admission requests against a fresh reservoir
async fn simulate(
    config: &Config,
    callers: usize,
    timeout: Duration,
    wait_idle: bool,
) -> Result<SimulationReport> {
    let reservoir = Reservoir::from_config(&config.reservoir)
        .context("Failed to build reservoir from configuration")?;
    info!(
        reservoir = %reservoir.name(),
        capacity = reservoir.capacity(),
        refill_ms = reservoir.refill_period().as_millis() as u64,
        callers,
        "Starting simulation"
    );

    let started = Instant::now();
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let reservoir = reservoir.clone();
            tokio::spawn(async move { reservoir.limit_timeout(timeout).await })
        })
        .collect();

    let mut admitted = 0;
    let mut cancelled = 0;
    for handle in handles {
        match handle.await.context("Caller task failed")? {
            Ok(()) => admitted += 1,
            Err(LimitError::Cancelled(_)) => cancelled += 1,
            Err(e) => return Err(e).context("Reservoir stopped during simulation"),
        }
    }
    let elapsed = started.elapsed();

    if wait_idle {
        reservoir.join_manager().await;
    }

    Ok(SimulationReport {
        callers,
        admitted,
        cancelled,
        elapsed_ms: elapsed.as_millis() as u64,
        stats: reservoir.stats(),
    })
}

fn print_report(report: &SimulationReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(report).context("Failed to serialize report")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            let stats = &report.stats;
            println!("callers:            {}", report.callers);
            println!("admitted:           {}", report.admitted);
            println!("cancelled:          {}", report.cancelled);
            println!("elapsed:            {}ms", report.elapsed_ms);
            println!("available:          {}/{}", stats.available, stats.capacity);
            println!("manager running:    {}", stats.manager_running);
            println!("refills:            {}", stats.refills);
            println!("refills dropped:    {}", stats.refills_dropped);
            println!("schedulers spawned: {}", stats.schedulers_spawned);
        }
    }
    Ok(())
}
