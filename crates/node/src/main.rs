//! # OCR3 Node
//!
//! Runs a local OCR3 committee until it has transmitted a number of
//! reports, optionally with some oracles crashed from the start.

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Parser;
use ocr3_config::{LoggingConfig, NodeConfig};
use ocr3_node::{Cluster, ClusterSettings, VERSION};
use ocr3_types::OracleId;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Local OCR3 cluster simulator
#[derive(Parser, Debug)]
#[command(name = "ocr3-node")]
#[command(version)]
#[command(about = "Simulate an OCR3 oracle committee in one process")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: text, json, or compact (overrides the config file)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Node configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Number of oracles in the committee
    #[arg(long, default_value = "4")]
    oracles: usize,

    /// Number of oracles crashed for the whole run
    #[arg(long, default_value = "0")]
    faulty: usize,

    /// Stop after this many reports reached the contract
    #[arg(long, default_value = "10")]
    rounds: u64,

    /// Give up after this many seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
    Compact,
}

impl LogFormat {
    fn from_config(format: &str) -> Self {
        match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Text,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let node_config = match &cli.config {
        Some(path) => NodeConfig::load(Path::new(path))?,
        None => NodeConfig::default(),
    };

    init_tracing(&cli, &node_config.logging)?;

    info!(version = VERSION, "Starting OCR3 node");

    let f = cli.oracles.saturating_sub(1) / 3;
    ensure!(
        cli.faulty <= f,
        "{} faulty oracles exceed the fault tolerance of {} oracles (f = {})",
        cli.faulty,
        cli.oracles,
        f
    );

    let settings = ClusterSettings {
        oracles: cli.oracles,
        f,
        local: node_config.local,
        ..Default::default()
    };
    let mut cluster = Cluster::start(settings)?;

    for id in (cli.oracles - cli.faulty)..cli.oracles {
        cluster.crash(id as OracleId).await;
    }

    let timeout = Duration::from_secs(cli.timeout_secs);
    let finished = tokio::select! {
        finished = cluster.wait_for_transmission(cli.rounds, timeout) => finished,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
    };

    let latest_seq_nr = cluster.contract().latest_seq_nr();
    if finished {
        info!(rounds = cli.rounds, latest_seq_nr, "Simulation complete");
    } else {
        warn!(rounds = cli.rounds, latest_seq_nr, "Simulation stopped early");
    }

    cluster.shutdown().await;
    Ok(())
}

/// Initialize tracing with the configured format and verbosity
fn init_tracing(cli: &Cli, logging: &LoggingConfig) -> Result<()> {
    let filter = match cli.verbose {
        0 => logging.level.to_lowercase(),
        1 => "info,ocr3_consensus=debug,ocr3_node=debug".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&logging.format));

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(env_filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(env_filter)
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(fmt::layer().compact())
                .with(env_filter)
                .init();
        }
    }

    Ok(())
}
