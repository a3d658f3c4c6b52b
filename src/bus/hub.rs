//! In-worker broadcast to attached sessions.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::debug;

use super::{EntryHandler, Result};
use crate::storage::LogEntry;

/// Broadcast point every session on a worker listens to.
///
/// Each session holds its own receiver, so a slow session only lags itself.
/// Entries from this worker's publishes and from peers both pass through
/// here exactly once.
#[derive(Clone)]
pub struct LocalHub {
    sender: broadcast::Sender<Arc<LogEntry>>,
}

impl LocalHub {
    /// Create a hub whose receivers buffer up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Deliver an entry to every current receiver.
    ///
    /// Returns the number of receivers reached.
    pub fn deliver(&self, entry: Arc<LogEntry>) -> usize {
        let sequence = entry.sequence;
        match self.sender.send(entry) {
            Ok(receivers) => {
                debug!(sequence, receivers, "Delivered entry to local hub");
                receivers
            }
            Err(_) => {
                debug!(sequence, "Delivered entry to local hub (no receivers)");
                0
            }
        }
    }

    /// New receiver; sees every entry delivered after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LogEntry>> {
        self.sender.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EntryHandler for LocalHub {
    fn handle(&self, entry: Arc<LogEntry>) -> BoxFuture<'static, Result<()>> {
        self.deliver(entry);
        Box::pin(async { Ok(()) })
    }
}
