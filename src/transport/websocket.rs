//! WebSocket transport: JSON text frames over a TCP connection.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

use super::{ClientFrame, FrameSink, FrameSource, Result, ServerFrame};

/// Complete the WebSocket handshake on an accepted TCP connection.
pub async fn accept(stream: TcpStream) -> Result<(WsSource, WsSink)> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (sink, source) = ws.split();
    Ok((WsSource { inner: source }, WsSink { inner: sink }))
}

/// Inbound half of a WebSocket connection.
pub struct WsSource {
    inner: SplitStream<WebSocketStream<TcpStream>>,
}

/// Outbound half of a WebSocket connection.
pub struct WsSink {
    inner: SplitSink<WebSocketStream<TcpStream>, Message>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Result<ClientFrame>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(m) => m,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(serde_json::from_str(&text).map_err(Into::into)),
                Message::Binary(bytes) => {
                    return Some(serde_json::from_slice(&bytes).map_err(Into::into))
                }
                Message::Close(_) => return None,
                // Pings are answered by tungstenite on the next write.
                other => trace!(?other, "Ignoring control frame"),
            }
        }
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: ServerFrame) -> Result<()> {
        let text = serde_json::to_string(&frame)?;
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}
