//! postbox-relay binary entry point.
//!
//! Usage:
//! ```bash
//! postbox-relay --config relay.toml
//! postbox-relay --port-file myport.info --database defensive.db
//! ```

use anyhow::Context;
use clap::Parser;
use postbox_relay::config::{load_port, Config};
use postbox_relay::http;
use postbox_relay::server::RelayServer;
use postbox_relay::storage::{MailboxStore, SqliteStorage};
use std::path::PathBuf;
use std::sync::Arc;

/// Store-and-forward relay for end-to-end encrypted messaging.
#[derive(Debug, Parser)]
#[command(name = "postbox-relay", version, about)]
struct Cli {
    /// Configuration file (defaults apply when it does not exist).
    #[arg(long, default_value = "relay.toml")]
    config: PathBuf,

    /// File holding the listening port (overrides `server.port_file`).
    #[arg(long)]
    port_file: Option<PathBuf>,

    /// SQLite database path (overrides `storage.database`).
    #[arg(long)]
    database: Option<PathBuf>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        tracing::info!(
            "No config file at {}, using defaults",
            cli.config.display()
        );
        Config::default()
    };

    if let Some(port_file) = &cli.port_file {
        config.server.port_file = port_file.clone();
    }
    if let Some(database) = &cli.database {
        config.storage.database = database.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let port = load_port(&config.server.port_file, config.server.default_port);
    let addr = config
        .server
        .listen_addr(port)
        .context("invalid listen address")?;

    let storage = SqliteStorage::new(&config.storage.database, &config.storage)
        .await
        .with_context(|| format!("opening {}", config.storage.database.display()))?;
    tracing::info!("Storage ready at {}", config.storage.database.display());

    let http_config = config.http.clone();
    let relay = Arc::new(RelayServer::new(config, storage));
    let listener = relay
        .bind(addr)
        .with_context(|| format!("binding {addr}"))?;

    if http_config.enabled {
        http::health::init_start_time();
        let http_listener = tokio::net::TcpListener::bind(&http_config.bind_address)
            .await
            .with_context(|| format!("binding HTTP on {}", http_config.bind_address))?;
        tracing::info!("HTTP endpoints on {}", http_config.bind_address);

        let router = http::build_router(relay.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(http_listener, router).await {
                tracing::error!("HTTP server failed: {}", e);
            }
        });
    }

    relay
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    relay.storage().close().await;
    tracing::info!("Relay stopped");
    Ok(())
}
