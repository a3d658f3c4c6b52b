//! courier - supervisor
//!
//! Prepares the shared log, spawns one `courier-worker` per configured
//! worker with its port and the peer topology, and stops them all on
//! Ctrl-C.
//!
//! Usage: courier [config.yaml]

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing::{error, info, warn};

use courier::bus::PeerRegistry;
use courier::config::Config;
use courier::process::{wait_for_ready, worker_executable, ManagedProcess, WorkerEnv};
use courier::storage::SqliteMessageStore;
use courier::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    // Create the schema once so workers never race on DDL.
    let store = SqliteMessageStore::connect(&config.storage).await?;
    store.init().await?;
    store.pool().close().await;
    info!(path = %config.storage.path, "Message log ready");

    let count = config.workers.count;
    let mut registry = PeerRegistry::new(config.ipc.base_path.clone())?;
    for index in 0..count {
        registry.register_worker(index)?;
    }
    let peers_json = registry.peers_to_json();

    let executable = worker_executable()?;
    let args: Vec<String> = config_path.into_iter().collect();
    let mut workers = Vec::with_capacity(count);
    for index in 0..count {
        let env = WorkerEnv {
            index,
            port: config.server.port_for(index),
            peers_json: peers_json.clone(),
        };
        workers.push(ManagedProcess::spawn(&executable, &args, &env)?);
    }

    for index in 0..count {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, config.server.port_for(index)));
        if let Err(e) = wait_for_ready(address).await {
            warn!(worker = index, error = %e, "Worker did not become ready");
        }
    }
    info!(workers = count, base_port = config.server.base_port, "courier running");

    let mut monitor = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            _ = monitor.tick() => {
                let mut running = 0;
                for worker in workers.iter_mut() {
                    if worker.is_running() {
                        running += 1;
                    }
                }
                if running == 0 {
                    error!("All workers exited");
                    break;
                }
            }
        }
    }

    info!("Stopping workers");
    for worker in &mut workers {
        if let Err(e) = worker.kill().await {
            warn!(process = %worker.label(), error = %e, "Failed to stop worker");
        }
    }
    registry.cleanup();
    Ok(())
}
