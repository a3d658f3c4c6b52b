//! Channel-backed connections.
//!
//! A [`MemoryClient`] plays the remote end of a connection whose server
//! halves are a [`MemorySource`] and a [`MemorySink`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ClientFrame, FrameSink, FrameSource, Result, ServerFrame, TransportError};

/// Create a connected (source, sink, client) triple.
pub fn connection() -> (MemorySource, MemorySink, MemoryClient) {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();

    (
        MemorySource { inner: client_rx },
        MemorySink { inner: server_tx },
        MemoryClient {
            outbound: client_tx,
            inbound: server_rx,
        },
    )
}

/// Server-side inbound half.
pub struct MemorySource {
    inner: mpsc::UnboundedReceiver<ClientFrame>,
}

/// Server-side outbound half.
pub struct MemorySink {
    inner: mpsc::UnboundedSender<ServerFrame>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<ClientFrame>> {
        self.inner.recv().await.map(Ok)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: ServerFrame) -> Result<()> {
        self.inner.send(frame).map_err(|_| TransportError::Closed)
    }
}

/// Client end of a memory connection.
pub struct MemoryClient {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
}

impl MemoryClient {
    pub fn send(&self, frame: ClientFrame) -> Result<()> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    pub fn attach(&self, session_id: Option<&str>, last_sequence: Option<i64>) -> Result<()> {
        self.send(ClientFrame::Attach {
            session_id: session_id.map(str::to_string),
            last_sequence,
        })
    }

    pub fn publish(&self, content: &str, idempotency_key: &str, ack_id: u64) -> Result<()> {
        self.send(ClientFrame::Publish {
            content: content.to_string(),
            idempotency_key: idempotency_key.to_string(),
            ack_id,
        })
    }

    /// Next frame from the server, or `None` if none arrives within `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<ServerFrame> {
        tokio::time::timeout(wait, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drop both directions, as a closed socket would.
    pub fn disconnect(self) {}
}
