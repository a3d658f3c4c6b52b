//! courier-worker - one client-facing worker process
//!
//! Serves WebSocket clients on its own port, appends to the shared log and
//! exchanges committed entries with its peers over Unix sockets. Normally
//! launched by `courier`; run alone it acts as a single-worker deployment.
//!
//! Usage: courier-worker [config.yaml]
//!
//! Environment:
//! - COURIER_WORKER_INDEX: this worker's index (default 0)
//! - PORT: listening port (default base_port + index)
//! - COURIER_PEERS: JSON peer list from the supervisor

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use courier::bus::{IpcConfig, IpcPeerChannel};
use courier::config::{Config, PORT_ENV_VAR, WORKER_INDEX_ENV_VAR};
use courier::storage::init_storage;
use courier::utils::bootstrap::{env_parse, init_tracing};
use courier::worker::Worker;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let index: usize = if std::env::var_os(WORKER_INDEX_ENV_VAR).is_some() {
        env_parse(WORKER_INDEX_ENV_VAR)?
    } else {
        0
    };
    let port: u16 = if std::env::var_os(PORT_ENV_VAR).is_some() {
        env_parse(PORT_ENV_VAR)?
    } else {
        config.server.port_for(index)
    };

    let store = init_storage(&config.storage).await?;

    let peers = Arc::new(IpcPeerChannel::new(IpcConfig::from_env(
        config.ipc.base_path.clone(),
        index,
        config.ipc.link_capacity,
    )?));
    let worker = Worker::start(index, &config, store, peers).await?;

    let listener = TcpListener::bind((config.server.host.as_str(), port)).await?;
    info!(worker = index, port, "courier worker listening");

    worker
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!(worker = index, "courier worker stopped");
    Ok(())
}
