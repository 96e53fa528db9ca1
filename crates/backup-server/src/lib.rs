//! Library surface for the backup protocol server: the connection acceptor
//! and dispatcher, factored out of `main` so integration tests can bind an
//! ephemeral port and drive the server with real sockets.

pub mod config;
pub mod dispatcher;

use std::net::SocketAddr;
use std::sync::Arc;

use backup_common::session::SessionRegistry;
use backup_common::stats::ServerStats;
use tokio::net::TcpListener;
use tracing::{error, info};

use config::ServerConfig;
use dispatcher::Dispatcher;

/// Accept connections on `listener` forever, spawning one dispatcher task
/// per socket. Shared state is created once and cloned into each task.
pub async fn serve(listener: TcpListener, config: Arc<ServerConfig>) -> ! {
    let registry = Arc::new(SessionRegistry::new());
    let stats = Arc::new(ServerStats::new());

    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                info!("New connection from {}", peer_addr);
                stats.log_connection();

                let registry = Arc::clone(&registry);
                let stats = Arc::clone(&stats);
                let config = Arc::clone(&config);

                tokio::spawn(async move {
                    let dispatcher =
                        Dispatcher::new(socket, peer_addr, registry, Arc::clone(&stats), config);
                    dispatcher.run().await;
                    stats.log_disconnection();
                    info!("[{}] disconnected", peer_addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Bind an ephemeral port on localhost and spawn `serve` on it, returning
/// the address clients should connect to. Used by integration tests.
pub async fn spawn_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");

    let config = Arc::new(ServerConfig {
        port: addr.port(),
        files_dir: std::env::temp_dir().join(format!(
            "backup-server-test-{}-{}",
            std::process::id(),
            addr.port()
        )),
        debug: false,
        verbose: false,
    });

    tokio::spawn(serve(listener, config));
    addr
}
