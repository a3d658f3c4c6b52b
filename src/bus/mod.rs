//! Fan-out of committed entries.
//!
//! This module contains:
//! - `LocalHub`: in-worker broadcast to every attached session
//! - `PeerChannel` trait: cross-process publish/subscribe between workers
//! - `EntryHandler` trait: for processing entries received from peers
//! - `FanoutRouter`: delivers a committed entry to the local hub and to
//!   every other worker
//! - Implementations: IPC (Unix sockets between worker processes),
//!   Channel (in-process, for running several workers in one process)

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::storage::LogEntry;

pub mod channel;
mod dispatch;
mod hub;
pub mod ipc;
mod router;

pub use channel::ChannelPeerChannel;
pub use dispatch::dispatch_to_handlers;
pub use hub::LocalHub;
pub use ipc::{IpcConfig, IpcPeerChannel, PeerInfo, PeerRegistry};
pub use router::FanoutRouter;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A committed entry tagged with the worker that committed it.
///
/// The origin lets a worker ignore its own broadcasts on channels that
/// loop back to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFrame {
    /// Index of the originating worker.
    pub origin: usize,
    /// The committed entry.
    pub entry: LogEntry,
}

/// Handler for processing entries received from other workers.
pub trait EntryHandler: Send + Sync {
    /// Process one committed entry.
    fn handle(&self, entry: Arc<LogEntry>) -> BoxFuture<'static, Result<()>>;
}

/// Cross-process channel between workers.
///
/// Each worker publishes the entries it committed and subscribes to entries
/// committed by every other worker. An implementation must never hand a
/// worker its own entries back.
///
/// Implementations:
/// - `IpcPeerChannel`: Unix sockets, one listener per worker process
/// - `ChannelPeerChannel`: tokio broadcast, workers sharing one process
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Send a committed entry to every other worker.
    async fn publish(&self, entry: Arc<LogEntry>) -> Result<()>;

    /// Register a handler for entries committed by other workers.
    async fn subscribe(&self, handler: Box<dyn EntryHandler>) -> Result<()>;

    /// Start receiving from peers (call after subscribe).
    async fn start_consuming(&self) -> Result<()>;
}
