//! feed-pinner daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (config file optional)
//! feed-pinner
//!
//! # Custom config, data directory and accepted tokens
//! feed-pinner --config pinner.toml --data-dir /var/lib/pinner --tokens tok1,tok2
//! ```
//!
//! On startup every persisted pin is re-subscribed in the background while
//! the HTTP API is already serving.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use feed_pinner::api::{self, AppState, BearerAuth};
use feed_pinner::{Config, DhtNetwork, PinManager, PinManagerConfig, SledSnapshotStore};

#[derive(Parser, Debug)]
#[command(name = "feed-pinner")]
#[command(about = "Keeps feeds pinned and serves their latest record")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "PINNER_CONFIG", default_value = "feed-pinner.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long, env = "PINNER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "PINNER_HTTP_PORT")]
    http_port: Option<u16>,

    /// Bearer tokens accepted by POST /pin/ (comma separated)
    #[arg(long, env = "PINNER_TOKENS", value_delimiter = ',')]
    tokens: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("feed_pinner=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config");
        Config::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    // CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if !cli.tokens.is_empty() {
        config.auth.tokens = cli.tokens;
    }

    info!("Data dir: {}", config.node.data_dir.display());

    std::fs::create_dir_all(&config.node.data_dir).context("creating data directory")?;
    let store = Arc::new(
        SledSnapshotStore::open(config.snapshot_db_path()).context("opening snapshot database")?,
    );

    let network = DhtNetwork::start(&config.p2p, &config.node.data_dir)
        .context("starting DHT network")?;
    info!(peer_id = %network.local_peer_id(), "P2P layer started");

    let pins = PinManager::new(
        PinManagerConfig {
            open_timeout: config.pins.open_timeout(),
        },
        store.clone(),
        Arc::new(network),
    );

    // Restore persisted pins without holding up the API
    let startup = pins.clone();
    tokio::spawn(async move {
        match startup.reconcile().await {
            Ok(report) => {
                for (key, reason) in &report.failed {
                    warn!(key = %key, reason = %reason, "Pin not restored");
                }
            }
            Err(e) => error!(error = %e, "Startup reconciliation failed"),
        }
    });
    if let Some(interval) = config.pins.reconcile_interval() {
        pins.spawn_reconcile_loop(interval);
    }

    let auth = BearerAuth::new(config.auth.tokens.clone());
    if !auth.is_configured() {
        warn!("No bearer tokens configured; POST /pin/ will reject every request");
    }

    let state = Arc::new(AppState::new(pins.clone(), auth));
    let app = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.api.bind_addr, config.api.http_port)
        .parse()
        .context("invalid API bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pins.shutdown();
    store.flush().await?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
