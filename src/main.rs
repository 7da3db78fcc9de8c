//! mqbridge - MQTT to WebSocket bridge
//!
//! Usage:
//!   mqbridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path
//!   --broker-host <HOST>    MQTT broker hostname
//!   --broker-port <PORT>    MQTT broker port (default: 1883)
//!   --ws-bind <ADDR>        WebSocket bind address
//!   --http-bind <ADDR>      Health endpoint bind address
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mqbridge::config::Config;
use mqbridge::server::{HealthServer, RealtimeServer};
use mqbridge::Supervisor;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// MQTT to WebSocket bridge for realtime dashboards
#[derive(Parser, Debug)]
#[command(name = "mqbridge")]
#[command(version = "0.1.0")]
#[command(about = "Bridges MQTT broker topics to realtime WebSocket clients")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker hostname
    #[arg(long)]
    broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    broker_port: Option<u16>,

    /// WebSocket bind address for realtime clients
    #[arg(long)]
    ws_bind: Option<SocketAddr>,

    /// HTTP bind address for the health endpoint
    #[arg(long)]
    http_bind: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise use defaults
    let mut config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // CLI args override file config
    if let Some(host) = args.broker_host {
        config.broker.host = host;
    }
    if let Some(port) = args.broker_port {
        config.broker.port = port;
    }
    if let Some(ws_bind) = args.ws_bind {
        config.server.ws_bind = ws_bind;
    }
    if let Some(http_bind) = args.http_bind {
        config.server.http_bind = http_bind;
    }

    // Logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting mqbridge");
    info!("  Broker: {}", config.broker.address());
    for sub in &config.topics.subscriptions {
        info!("  Subscription: {} (qos={})", sub.topic, sub.qos);
    }
    info!("  Command topic: {}", config.topics.command_topic);
    info!("  WebSocket bind: {}", config.server.ws_bind);
    info!("  Health bind: {}", config.server.http_bind);
    info!("  Journal: {:?}", config.journal.path);

    // Publisher first (best effort), then the subscriber loop, then the
    // client-facing servers.
    let supervisor = Supervisor::start(&config).await;

    let (subscriber_state, publisher_state) = supervisor.state_handles();
    let health = HealthServer::new(subscriber_state, publisher_state, config.server.http_bind);
    tokio::spawn(async move {
        if let Err(e) = health.run().await {
            error!("Health server error: {}", e);
        }
    });

    let realtime = RealtimeServer::new(
        config.server.ws_bind,
        supervisor.fanout(),
        supervisor.relay(),
    );
    tokio::spawn(async move {
        if let Err(e) = realtime.run().await {
            error!("Realtime server error: {}", e);
        }
    });

    // The broker loops are daemon-style; only process shutdown ends them
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
