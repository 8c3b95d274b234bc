//! Parley server binary.
//!
//! # Usage
//!
//! ```bash
//! # Self-signed certificate (development)
//! parley-server --bind 0.0.0.0:4433
//!
//! # Real certificate
//! parley-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use std::time::Duration;

use clap::Parser;
use parley_server::{DriverConfig, Server, ServerRuntimeConfig, TlsPaths};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley presence and direct-message relay
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Presence and direct-message relay server")]
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

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Maximum display name length in bytes
    #[arg(long, default_value = "64")]
    max_name_len: usize,

    /// Seconds of silence before a connection is dropped
    #[arg(long, default_value = "30")]
    idle_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Parley server starting");

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        tls: TlsPaths { cert_path: args.cert, key_path: args.key },
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        driver: DriverConfig {
            max_connections: args.max_connections,
            max_name_len: args.max_name_len,
        },
    };

    let server = Server::bind(config)?;
    tracing::info!("Server listening on {}", server.local_addr()?);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server.run_until(shutdown).await?;

    Ok(())
}
