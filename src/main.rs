//! CLI entry point for the bus position grabber.
//!
//! Loads the `dataGrabber` config, sets up logging, and either polls the feed
//! until interrupted or runs a single cycle.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use riobus_grabber::{
    config::{ConfigSource, FileConfig, PollConfig, StaticConfig},
    fetch::BasicClient,
    output::print_json,
    scheduler::Poller,
    sink::{ChannelSink, LogSink},
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const DEFAULT_CONFIG_PATH: &str = "riobus-config.json";

#[derive(Parser)]
#[command(name = "riobus_grabber")]
#[command(about = "Polls a bus position feed and groups vehicles by route", long_about = None)]
struct Cli {
    /// Path to the JSON config file (falls back to $RIOBUS_CONFIG)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed on the configured interval until Ctrl+C
    Run {
        /// Re-read the config file before every cycle
        #[arg(long, default_value_t = false)]
        reload_config: bool,

        /// CSV file to append per-cycle statistics to
        #[arg(long, value_name = "FILE")]
        stats_csv: Option<PathBuf>,
    },
    /// Run a single cycle and log its statistics
    Once {
        /// Also write the grouped snapshot as JSON to stdout
        #[arg(long, default_value_t = false)]
        print_snapshot: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/riobus_grabber.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("riobus_grabber.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("RIOBUS_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match cli.command {
        Commands::Run {
            reload_config,
            stats_csv,
        } => {
            if reload_config {
                let source = FileConfig::open(&config_path)?;
                poll(source, stats_csv).await?;
            } else {
                let config = PollConfig::load(&config_path)?;
                poll(StaticConfig::new(config), stats_csv).await?;
            }
        }
        Commands::Once { print_snapshot } => {
            let config = PollConfig::load(&config_path)?;
            let client = BasicClient::new(config.request_timeout())?;
            let (sink, mut snapshots) = ChannelSink::new(1);
            let poller = Poller::new(client, sink, StaticConfig::new(config));

            let stats = poller.run_cycle().await;
            print_json(&stats)?;

            if print_snapshot {
                if let Ok(snapshot) = snapshots.try_recv() {
                    serde_json::to_writer_pretty(std::io::stdout(), &snapshot)
                        .context("failed to write snapshot")?;
                    println!();
                }
            }
        }
    }

    Ok(())
}

/// Polls until Ctrl+C, logging each delivered snapshot.
#[tracing::instrument(skip_all)]
async fn poll(source: impl ConfigSource + 'static, stats_csv: Option<PathBuf>) -> Result<()> {
    let initial = source.current().await;
    info!(
        url = %initial.url(),
        interval_ms = initial.interval_ms,
        timeout_ms = initial.timeout_ms,
        "Starting poller"
    );

    let client = BasicClient::new(initial.request_timeout())?;
    let mut poller = Poller::new(client, LogSink, source);
    if let Some(path) = stats_csv {
        info!(path = %path.display(), "Writing cycle stats to CSV");
        poller = poller.with_stats_csv(path);
    }

    poller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Poller stopped");
    Ok(())
}
