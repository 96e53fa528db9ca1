//! Backup protocol server.
//!
//! Accepts TCP connections, registers clients by username, exchanges RSA
//! and AES session keys, and receives AES-encrypted files, verifying them
//! against a `cksum`-compatible CRC.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use backup_server::config::{Cli, ServerConfig};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(ServerConfig::load(cli));

    let filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    info!("==============================================");
    info!("   Backup Protocol Server v{}", env!("CARGO_PKG_VERSION"));
    info!("==============================================");
    info!("Protocol version: {}", backup_common::protocol::PROTOCOL_VERSION);
    info!("Port: {}", config.port);
    info!("Files directory: {}", config.files_dir.display());

    std::fs::create_dir_all(&config.files_dir)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    backup_server::serve(listener, config).await
}
