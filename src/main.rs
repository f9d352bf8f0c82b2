//! Sensor node entry point

use clap::{Parser, Subcommand};
use sensor_node::config::{ConnectFailurePolicy, NodeConfig};
use sensor_node::observability::logging::{init_logging, parse_level, LogFormat};
use sensor_node::observability::init_default_logging;
use sensor_node::SensorNode;
use std::env;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn, Level};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["node.toml", "config/node.toml"];

/// Networked sensor node: sample, alert, publish over MQTT/TLS
#[derive(Parser)]
#[command(name = "sensor-node")]
#[command(about = "Sample a sensor, drive alert indicators and publish telemetry over MQTT/TLS")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SENSOR_NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the sensor cycle until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!("Starting sensor node v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_node(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Sensor node stopped");
}

/// `-v` flags win over `LOG_LEVEL`
fn init_observability(verbose: u8) {
    if verbose == 0 {
        init_default_logging();
        return;
    }

    let level = if verbose == 1 { Level::DEBUG } else { Level::TRACE };
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    init_logging(level, format, verbose > 2);

    if let Ok(requested) = env::var("LOG_LEVEL") {
        if parse_level(&requested) != level {
            warn!(requested = %requested, "LOG_LEVEL overridden by -v");
        }
    }
}

fn load_configuration(
    config_path: Option<&PathBuf>,
) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(NodeConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(NodeConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create node.toml".into())
}

async fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        device_id = %config.device.id,
        variant = ?config.device.variant,
        broker = %config.mqtt.broker_url,
        "Node configured"
    );

    let mut node = SensorNode::from_config(&config)?;

    if let Err(e) = node.start().await {
        match config.connection.on_connect_failure {
            ConnectFailurePolicy::Exit => return Err(e.into()),
            ConnectFailurePolicy::Continue => {
                warn!(error = %e, "Continuing without a broker session; telemetry will not be published")
            }
        }
    }

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = node.run() => {}
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }

    info!(cycles = node.cycles(), "Sensor loop stopped");
    Ok(())
}

fn handle_config_command(
    config: &NodeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
