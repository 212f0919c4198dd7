//! Tavern server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory player store, self-signed certificate (development)
//! tavern-server --bind 0.0.0.0:4433
//!
//! # Durable player store and real TLS (production)
//! tavern-server --bind 0.0.0.0:4433 --data-dir /var/lib/tavern \
//!     --cert cert.pem --key key.pem
//! ```

use std::path::PathBuf;

use clap::Parser;
use tavern_server::{
    LobbyConfig, MemoryPlayerStore, RedbPlayerStore, Server, ServerRuntimeConfig,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tavern session broker
#[derive(Parser, Debug)]
#[command(name = "tavern-server")]
#[command(about = "Real-time presence and message-delivery broker")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Directory for the durable player store; in-memory when omitted
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Reject clients below this protocol version
    #[arg(long, default_value = "0")]
    min_version: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Tavern server starting");

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided, using a self-signed one");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        lobby: LobbyConfig { min_required_version: args.min_version, ..Default::default() },
        connection: Default::default(),
    };

    let server = match args.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let store = RedbPlayerStore::open(dir.join("players.redb"))?;
            Server::bind(config, store)?
        },
        None => {
            tracing::warn!("no data directory given, player records will not survive restarts");
            Server::bind(config, MemoryPlayerStore::new())?
        },
    };

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
