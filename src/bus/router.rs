//! Fan-out router.

use std::sync::Arc;

use tracing::info;

use super::{LocalHub, PeerChannel, Result};
use crate::storage::LogEntry;

/// Delivers each committed entry to every session on every worker.
///
/// Local sessions are reached through the hub directly; the peer channel
/// carries the entry to the other workers only, whose own hubs then
/// deliver it. Every session therefore receives each entry once, and the
/// publisher sees its own message on the same path as everyone else.
pub struct FanoutRouter {
    worker_index: usize,
    hub: LocalHub,
    peers: Arc<dyn PeerChannel>,
}

impl FanoutRouter {
    pub fn new(worker_index: usize, hub: LocalHub, peers: Arc<dyn PeerChannel>) -> Self {
        Self {
            worker_index,
            hub,
            peers,
        }
    }

    /// Route entries committed by other workers into the local hub.
    pub async fn start(&self) -> Result<()> {
        self.peers.subscribe(Box::new(self.hub.clone())).await?;
        self.peers.start_consuming().await?;
        info!(worker = self.worker_index, "Fan-out router started");
        Ok(())
    }

    /// Fan out one committed entry.
    ///
    /// Local delivery cannot fail. An error means some peers may have missed
    /// the entry; it stays durable in the store and reaches them on replay.
    #[tracing::instrument(name = "router.broadcast", skip_all, fields(sequence = entry.sequence))]
    pub async fn broadcast(&self, entry: LogEntry) -> Result<()> {
        let entry = Arc::new(entry);
        self.hub.deliver(Arc::clone(&entry));
        self.peers.publish(entry).await
    }

    /// The hub local sessions subscribe to.
    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }
}
