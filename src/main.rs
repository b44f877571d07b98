//! Telemetry Forwarder - Main Entry Point
//!
//! Exit code 0 on a clean shutdown, 1 on a fatal error.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use telemetry_forwarder::config::ForwarderConfig;
use telemetry_forwarder::forwarder::{build_sensor, Forwarder};
use telemetry_forwarder::observability::init_default_logging;
use telemetry_forwarder::ForwarderError;
use tokio::signal;
use tracing::{error, info, warn};

/// Sensor telemetry forwarder for MQTT brokers
#[derive(Parser)]
#[command(name = "telemetry-forwarder")]
#[command(about = "Publishes sensor readings to an MQTT broker with at-least-once delivery")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Force debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Use a simulated sensor instead of the AM2315
    #[arg(short, long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the forwarder until interrupted
    Run,
    /// Validate the configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.debug);

    info!(
        "Starting telemetry forwarder v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match ForwarderConfig::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_forwarder(config, cli.simulate).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        match e.topic() {
            Some(topic) => error!(topic = %topic, "Fatal: {}", e),
            None => error!("Fatal: {}", e),
        }
        process::exit(e.exit_code());
    }

    info!("Application shutdown complete");
}

async fn run_forwarder(config: ForwarderConfig, simulate: bool) -> Result<(), ForwarderError> {
    let sensor = build_sensor(&config, simulate);
    let stats = Forwarder::new(config)
        .run(sensor, shutdown_signal())
        .await?;

    info!(
        cycles = stats.cycles,
        published = stats.published,
        "Forwarder stopped"
    );
    Ok(())
}

fn handle_config_command(config: &ForwarderConfig, show: bool) -> Result<(), ForwarderError> {
    info!("Configuration is valid");
    info!(topic = %config.telemetry_topic(), client_id = %config.client_id());

    if show {
        match toml::to_string_pretty(config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => warn!("Failed to render configuration: {}", e),
        }
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received SIGINT, shutting down gracefully..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for SIGINT: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT, shutting down gracefully...");
}
