//! Multiflow daemon - streaming anomaly and drift monitor
//!
//! Reads one event per line from a file or standard input, scores it with
//! the configured detector and writes verdicts to InfluxDB (or the log) and
//! a CSV archive.

use anyhow::Context;
use clap::Parser;
use multiflow_daemon::{DaemonConfig, InputFormat, Server};
use multiflow_monitor::StrategyKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Multiflow daemon CLI
#[derive(Parser)]
#[command(name = "multiflowd")]
#[command(about = "Multiflow - streaming anomaly and drift monitor", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MULTIFLOW_CONFIG")]
    config: Option<String>,

    /// Input file ("-" or unset reads stdin)
    #[arg(short, long, env = "MULTIFLOW_INPUT")]
    input: Option<String>,

    /// Input line format
    #[arg(short, long, value_enum, env = "MULTIFLOW_FORMAT")]
    format: Option<InputFormat>,

    /// Detector (forecast, isolation, kernel, iqr, drift)
    #[arg(short, long, env = "MULTIFLOW_DETECTOR")]
    detector: Option<StrategyKind>,

    /// Log level
    #[arg(long, env = "MULTIFLOW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "MULTIFLOW_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Override with CLI args
    if let Some(input) = cli.input {
        config.source.input = Some(input);
    }
    if let Some(format) = cli.format {
        config.source.format = format;
    }
    if let Some(detector) = cli.detector {
        config.monitor.detector = detector;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let server = Server::new(config).context("invalid monitor configuration")?;
    let stats = server.run().await.context("monitor stopped with an error")?;
    tracing::info!(
        accepted = stats.accepted,
        rejected = stats.rejected(),
        anomalies = stats.anomalies,
        "done"
    );
    Ok(())
}
