//! In-memory channel-based peer channel.
//!
//! Uses a tokio broadcast channel as the "network" between workers that
//! share one process. Ideal for tests and single-binary embedding where
//! several workers run side by side without sockets.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use super::{EntryHandler, PeerChannel, PeerFrame, Result};
use crate::storage::LogEntry;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// In-process peer channel.
///
/// All instances created through [`ChannelPeerChannel::join`] share one
/// broadcast channel. Each instance drops frames it originated itself.
pub struct ChannelPeerChannel {
    /// Index of the worker owning this end.
    origin: usize,
    /// Shared broadcast sender.
    sender: broadcast::Sender<Arc<PeerFrame>>,
    /// Registered entry handlers.
    handlers: Arc<RwLock<Vec<Box<dyn EntryHandler>>>>,
    /// Flag indicating if consumer task is running.
    consuming: Arc<RwLock<bool>>,
}

impl ChannelPeerChannel {
    /// Create a new network and the end owned by worker `origin`.
    pub fn new(origin: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        info!(origin, "Channel peer network initialized");
        Self::with_sender(origin, sender)
    }

    /// Create another worker's end of the same network.
    pub fn join(&self, origin: usize) -> Self {
        Self::with_sender(origin, self.sender.clone())
    }

    fn with_sender(origin: usize, sender: broadcast::Sender<Arc<PeerFrame>>) -> Self {
        Self {
            origin,
            sender,
            handlers: Arc::new(RwLock::new(Vec::new())),
            consuming: Arc::new(RwLock::new(false)),
        }
    }

    /// Index of the worker owning this end.
    pub fn origin(&self) -> usize {
        self.origin
    }

    async fn start_consuming_impl(&self) -> Result<()> {
        {
            let mut consuming = self.consuming.write().await;
            if *consuming {
                return Ok(());
            }
            *consuming = true;
        }

        let mut receiver = self.sender.subscribe();
        let handlers = self.handlers.clone();
        let origin = self.origin;

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(frame) => {
                        if frame.origin == origin {
                            continue;
                        }

                        debug!(
                            from = frame.origin,
                            sequence = frame.entry.sequence,
                            "Received entry via channel"
                        );

                        let entry = Arc::new(frame.entry.clone());
                        super::dispatch_to_handlers(&handlers, &entry).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(origin, skipped = n, "Peer channel consumer lagged, skipped entries");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(origin, "Peer channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });

        info!(origin, "Channel peer consumer started");

        Ok(())
    }
}

#[async_trait]
impl PeerChannel for ChannelPeerChannel {
    async fn publish(&self, entry: Arc<LogEntry>) -> Result<()> {
        let frame = Arc::new(PeerFrame {
            origin: self.origin,
            entry: (*entry).clone(),
        });

        match self.sender.send(frame) {
            Ok(receivers) => {
                debug!(sequence = entry.sequence, receivers, "Published entry to channel");
            }
            Err(_) => {
                debug!(sequence = entry.sequence, "Published entry (no peers)");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, handler: Box<dyn EntryHandler>) -> Result<()> {
        let count = {
            let mut handlers = self.handlers.write().await;
            handlers.push(handler);
            handlers.len()
        };

        info!(origin = self.origin, handler_count = count, "Handler subscribed to channel");

        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        self.start_consuming_impl().await
    }
}
