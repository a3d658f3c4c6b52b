//! Client transport seam.
//!
//! The session logic talks to a connection only through [`FrameSource`]
//! and [`FrameSink`], so it never sees framing, pings or socket details.
//!
//! Supports:
//! - WebSocket: JSON text frames over TCP (one endpoint per worker)
//! - Memory: channel-backed connections for tests and embedding

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::LogEntry;

pub mod memory;
pub mod websocket;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur on a client connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Connection closed")]
    Closed,
}

impl TransportError {
    /// Whether the connection is unusable after this error.
    ///
    /// A frame that fails to decode leaves the connection intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Codec(_))
    }
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame of every connection.
    Attach {
        /// Session to resume, if the client had one.
        #[serde(default)]
        session_id: Option<String>,
        /// Highest sequence the client has seen.
        #[serde(default)]
        last_sequence: Option<i64>,
    },
    /// Publish a message.
    Publish {
        content: String,
        idempotency_key: String,
        /// Echoed back in the acknowledgment.
        ack_id: u64,
    },
}

/// Frames sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to `attach`.
    Attached { session_id: String, recovered: bool },
    /// One log entry, live or replayed; the two are indistinguishable.
    Deliver { content: String, sequence: i64 },
    /// The publish with this id is committed (or was a duplicate).
    Ack { ack_id: u64 },
}

impl ServerFrame {
    pub fn deliver(entry: &LogEntry) -> Self {
        ServerFrame::Deliver {
            content: entry.content.clone(),
            sequence: entry.sequence,
        }
    }
}

/// Inbound half of a client connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame from the client; `None` once the client has gone away.
    async fn recv(&mut self) -> Option<Result<ClientFrame>>;
}

/// Outbound half of a client connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame to the client.
    async fn send(&mut self, frame: ServerFrame) -> Result<()>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
