//! Tandem reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!                     │                 TANDEM PROXY                 │
//!   Client            │  ┌────────┐   ┌─────────────┐   ┌─────────┐  │        Origin
//!   ──────────────────┼─▶│ inbound│──▶│ SharedPair  │──▶│outbound │──┼──────▶ Server
//!   ◀─────────────────┼──│session │◀──│ (2 pipes,   │◀──│ session │◀─┼───────
//!                     │  └────────┘   │  2 states)  │   └─────────┘  │
//!                     │      ▲        └─────────────┘        ▲       │
//!                     │      │                               │       │
//!                     │ ClientSideHandler          OriginSideHandler │
//!                     │                                              │
//!                     │  config · observability · lifecycle          │
//!                     └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tandem_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use tandem_proxy::lifecycle::{spawn_signal_listener, Shutdown};
use tandem_proxy::net::{Listener, ProxyServer};
use tandem_proxy::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "tandem-proxy")]
#[command(version, about = "Reverse proxy forwarding every connection to one origin server", long_about = None)]
struct Cli {
    /// Origin host name or address
    #[arg(required_unless_present = "config")]
    host: Option<String>,

    /// Origin port
    port: Option<u16>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8888
    #[arg(short, long)]
    bind: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };
        if let Some(host) = self.host {
            config.target.host = host;
        }
        if let Some(port) = self.port {
            config.target.port = port;
        }
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    init_logging(&config.observability.log_level, config.observability.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tandem-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        target = %format!("{}:{}", config.target.host, config.target.port),
        max_connections = config.listener.max_connections,
        socket_timeout_secs = config.timeouts.socket_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_listener(Arc::clone(&shutdown));

    let server = ProxyServer::new(&config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
