//! mqtt-telemetry - Main Entry Point
//!
//! Connects to a broker, subscribes to the configured request topic and
//! publishes a telemetry payload on a fixed interval until interrupted.

use clap::{Parser, Subcommand};
use mqtt_telemetry::config::ClientConfig;
use mqtt_telemetry::observability::{
    init_default_logging, init_logging, level_from_verbosity, LogFormat,
};
use mqtt_telemetry::{
    Client, ClientError, ConnectionState, Pump, ReceivedMessage, SessionEvent, TcpTransport,
};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// MQTT 3.1.1 telemetry client
#[derive(Parser)]
#[command(name = "mqtt-telemetry")]
#[command(about = "Publish telemetry to an MQTT broker and print incoming requests")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe and publish until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 {
        let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
        init_logging(level_from_verbosity(cli.verbose), LogFormat::parse(&format), false);
    } else {
        init_default_logging();
    }

    info!("Starting mqtt-telemetry v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ClientConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["mqtt-telemetry.toml", "config/mqtt-telemetry.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ClientConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found, using defaults");
            let config = ClientConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn run_client(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (host, port) = config.broker_address()?;
    let options = config.connect_options()?;
    let qos = config.telemetry_qos()?;
    info!(host = %host, port, client_id = %options.client_id, "Connecting");

    let client: Client<TcpTransport> = Client::new(config.session_settings());
    client.set_message_handler(|message: &ReceivedMessage| {
        println!(
            "Received publish('{}'): {}",
            message.topic_lossy(),
            message.payload_lossy()
        );
    })?;
    client.set_event_handler(|event: &SessionEvent| match event {
        SessionEvent::DeliveryFailed { .. } => {
            if let Some(e) = event.as_error() {
                warn!(error = %e, "Telemetry publish was never acknowledged")
            }
        }
        SessionEvent::Subscribed { return_codes, .. } => {
            info!(?return_codes, "Subscription acknowledged")
        }
        other => debug!(event = ?other, "Session event"),
    })?;

    // The socket connect blocks; keep it off the runtime threads
    let transport =
        tokio::task::spawn_blocking(move || TcpTransport::connect(&host, port)).await??;
    client.connect(transport, options)?;

    let pump = Pump::spawn(client.clone(), config.pump_interval());
    if let Err(e) = client.wait_connected().await {
        pump.stop().await?;
        return Err(e.into());
    }
    info!("Connected to broker");

    if let Some(filter) = &config.telemetry.subscribe_topic {
        client.subscribe(filter, qos)?;
    }

    let outcome = publish_until_stopped(&client, &config, qos).await;

    info!("Shutting down");
    pump.shutdown().await?;

    let metrics = client.metrics()?;
    info!(metrics = %serde_json::to_string(&metrics)?, "Session metrics");

    outcome
}

async fn publish_until_stopped(
    client: &Client<TcpTransport>,
    config: &ClientConfig,
    qos: mqtt_telemetry::QoS,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut state_rx = client.state_receiver()?;
    let mut ticker = time::interval(config.publish_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                return Ok(());
            }
            changed = state_rx.changed() => {
                let state = state_rx.borrow_and_update().clone();
                if changed.is_err() || matches!(state, ConnectionState::Disconnected(_)) {
                    error!(?state, "MQTT session lost");
                    return Err(format!("MQTT session lost: {state:?}").into());
                }
            }
            _ = ticker.tick() => {
                let topic = &config.telemetry.publish_topic;
                match client.publish(topic, config.telemetry.payload.clone(), qos) {
                    Ok(packet_id) => debug!(?packet_id, topic = %topic, "Telemetry queued"),
                    Err(
                        e @ (ClientError::SendBufferFull { .. }
                        | ClientError::PacketIdsExhausted { .. }),
                    ) => {
                        warn!(error = %e, "Skipping telemetry sample");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

fn handle_config_command(
    config: ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
