//! Traffic Gateway - edge bridge for smart intersection controllers
//!
//! Usage:
//!   traffic-gateway [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path
//!   --local <ADDR>          Local broker address (default: localhost:1883)
//!   --cloud <ADDR>          Cloud broker endpoint
//!   --live-bind <ADDR>      Live WebSocket bind address (default: 0.0.0.0:8765)
//!   --api-bind <ADDR>       Control API bind address (default: 0.0.0.0:8090)
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use traffic_gateway::api::{ApiServer, ControlApi};
use traffic_gateway::bridge::Bridge;
use traffic_gateway::config::Config;
use traffic_gateway::link::{CloudCredentials, CloudLink, LocalLink};
use traffic_gateway::live::{Fanout, LiveServer};
use traffic_gateway::registry::DeviceRegistry;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
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

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// Traffic Gateway - local/cloud MQTT bridge with live dashboards
#[derive(Parser, Debug)]
#[command(name = "traffic-gateway")]
#[command(version)]
#[command(about = "Bridge between intersection controllers, the cloud and live dashboards")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local broker address (host:port)
    #[arg(long)]
    local: Option<String>,

    /// Cloud broker endpoint (host:port)
    #[arg(long)]
    cloud: Option<String>,

    /// Live WebSocket bind address
    #[arg(long)]
    live_bind: Option<SocketAddr>,

    /// Control API bind address
    #[arg(long)]
    api_bind: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

impl Args {
    /// CLI args override file config
    fn apply(&self, config: &mut Config) {
        if let Some(local) = &self.local {
            config.local.address = local.clone();
        }
        if let Some(cloud) = &self.cloud {
            config.cloud.address = cloud.clone();
        }
        if let Some(bind) = self.live_bind {
            config.live.bind = bind;
        }
        if let Some(bind) = self.api_bind {
            config.api.bind = bind;
        }
        if let Some(level) = self.log_level {
            config.log.level = format!("{:?}", level).to_lowercase();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Without --config only defaults and GATEWAY__* variables apply
    let mut config = match Config::read(args.config.clone().unwrap_or_default()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file: {}", e);
            std::process::exit(1);
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_level = LogLevel::from_config(&config.log.level);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // Credentials are the only fatal runtime dependency
    let Some(tls) = config.cloud.tls.as_ref() else {
        error!("Cloud TLS credentials are not configured");
        std::process::exit(1);
    };
    let credentials = match CloudCredentials::load(tls) {
        Ok(credentials) => credentials,
        Err(e) => {
            error!("Failed to load cloud credentials: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Traffic Gateway");
    info!("  Local broker: {}", config.local.address);
    info!("  Cloud broker: {}", config.cloud.address);
    info!("  Live clients: ws://{}", config.live.bind);
    if config.api.enabled {
        info!("  Control API: http://{}", config.api.bind);
    } else {
        info!("  Control API: disabled");
    }
    match config.cloud.heartbeat() {
        Some(interval) => info!("  Heartbeat: every {:?}", interval),
        None => info!("  Heartbeat: disabled"),
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let registry = Arc::new(DeviceRegistry::with_bootstrap(config.bootstrap_units()));
    let fanout = Arc::new(Fanout::new(config.live.client_queue_capacity));

    // One inbound queue per domain
    let capacity = config.bridge.inbound_capacity;
    let (local_tx, local_rx) = mpsc::channel(capacity);
    let (cloud_tx, cloud_rx) = mpsc::channel(capacity);
    let (live_tx, live_rx) = mpsc::channel(capacity);

    let (local, local_task) = LocalLink::connect(&config.local, local_tx, shutdown_tx.subscribe());
    let (cloud, cloud_task) = CloudLink::connect(
        &config.cloud,
        &credentials,
        cloud_tx,
        shutdown_tx.subscribe(),
    );

    let bridge = Arc::new(Bridge::new(
        registry.clone(),
        fanout.clone(),
        local,
        cloud.clone(),
    ));

    let mut tasks = vec![
        local_task,
        cloud_task,
        bridge.spawn_drain("local", local_rx, shutdown_tx.subscribe()),
        bridge.spawn_drain("cloud", cloud_rx, shutdown_tx.subscribe()),
        bridge.spawn_drain("live", live_rx, shutdown_tx.subscribe()),
    ];

    if let Some(interval) = config.cloud.heartbeat() {
        tasks.push(cloud.spawn_heartbeat(interval, shutdown_tx.subscribe()));
    }

    let live = LiveServer::bind(&config.live, fanout, live_tx).await?;
    tasks.push(tokio::spawn(live.run(shutdown_tx.subscribe())));

    if config.api.enabled {
        let api = Arc::new(ControlApi::new(registry, cloud));
        let server = ApiServer::bind(api, config.api.bind).await?;
        tasks.push(tokio::spawn(server.run(shutdown_tx.subscribe())));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
