//! IPC peer channel - same interface as the in-process channel.
//!
//! Publishing: one queued link per peer writes length-prefixed frames.
//! Consuming: a Unix listener on this worker's own socket.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use backon::Retryable;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::PeerInfo;
use super::{socket_path, MAX_FRAME_BYTES};
use crate::bus::{dispatch_to_handlers, BusError, EntryHandler, PeerChannel, PeerFrame, Result};
use crate::config::PEERS_ENV_VAR;
use crate::storage::LogEntry;
use crate::utils::retry::{peer_link_backoff, ACCEPT_RETRY_DELAY};

/// Configuration for the IPC peer channel.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// Base path for sockets.
    pub base_path: PathBuf,
    /// Index of the worker owning this channel.
    pub worker_index: usize,
    /// Every worker in the topology, this one included.
    pub peers: Vec<PeerInfo>,
    /// Frames queued per outgoing link.
    pub link_capacity: usize,
}

impl IpcConfig {
    /// Create config with an explicit peer list.
    pub fn new(
        base_path: impl Into<PathBuf>,
        worker_index: usize,
        peers: Vec<PeerInfo>,
        link_capacity: usize,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            worker_index,
            peers,
            link_capacity,
        }
    }

    /// Create config, loading the peer list from env var.
    ///
    /// An unset variable means a single worker with no peers; a malformed
    /// one is an error.
    pub fn from_env(
        base_path: impl Into<PathBuf>,
        worker_index: usize,
        link_capacity: usize,
    ) -> Result<Self> {
        Ok(Self::new(
            base_path,
            worker_index,
            load_peers_from_env()?,
            link_capacity,
        ))
    }

    /// This worker's listening socket.
    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.base_path, self.worker_index)
    }
}

/// Load peer list from env var.
fn load_peers_from_env() -> Result<Vec<PeerInfo>> {
    match std::env::var(PEERS_ENV_VAR) {
        Ok(json) => serde_json::from_str(&json).map_err(|e| {
            error!(error = %e, "Failed to parse {}", PEERS_ENV_VAR);
            BusError::Codec(e)
        }),
        Err(_) => {
            debug!("{} not set, running without peers", PEERS_ENV_VAR);
            Ok(Vec::new())
        }
    }
}

/// Serialize a frame as a 4-byte big-endian length followed by JSON.
fn encode_frame(frame: &PeerFrame) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(frame)?;
    let mut bytes = Vec::with_capacity(4 + body.len());
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Outgoing link to one peer.
struct PeerLink {
    index: usize,
    sender: mpsc::Sender<Arc<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl PeerLink {
    fn spawn(peer: PeerInfo, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let index = peer.index;
        let task = tokio::spawn(run_link(peer, receiver));
        Self {
            index,
            sender,
            task,
        }
    }
}

async fn connect(peer: &PeerInfo) -> std::io::Result<UnixStream> {
    let path = peer.socket_path.clone();
    (|| UnixStream::connect(path.clone()))
        .retry(peer_link_backoff())
        .notify(|e, delay| {
            debug!(peer = peer.index, error = %e, ?delay, "Peer not reachable yet, retrying");
        })
        .await
}

/// Drain queued frames into the peer's socket, reconnecting as needed.
async fn run_link(peer: PeerInfo, mut receiver: mpsc::Receiver<Arc<Vec<u8>>>) {
    let mut stream: Option<UnixStream> = None;

    while let Some(frame) = receiver.recv().await {
        // A dead connection only shows up on write; retry once on a fresh one.
        for attempt in 0..2 {
            if stream.is_none() {
                match connect(&peer).await {
                    Ok(s) => {
                        info!(peer = peer.index, "Connected to peer");
                        stream = Some(s);
                    }
                    Err(e) => {
                        warn!(peer = peer.index, error = %e, "Peer unreachable, dropping entry");
                        break;
                    }
                }
            }

            let Some(conn) = stream.as_mut() else {
                break;
            };

            match conn.write_all(&frame).await {
                Ok(()) => {
                    debug!(peer = peer.index, "Sent entry to peer");
                    break;
                }
                Err(e) => {
                    stream = None;
                    if attempt == 0 {
                        debug!(peer = peer.index, error = %e, "Peer write failed, reconnecting");
                    } else {
                        warn!(peer = peer.index, error = %e, "Peer write failed, dropping entry");
                    }
                }
            }
        }
    }

    debug!(peer = peer.index, "Peer link closed");
}

/// Read frames from one inbound peer connection until it closes.
async fn read_frames(
    mut stream: UnixStream,
    handlers: Arc<RwLock<Vec<Box<dyn EntryHandler>>>>,
    own_index: usize,
) {
    loop {
        let len = match stream.read_u32().await {
            Ok(n) => n as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Peer connection closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Peer read error");
                return;
            }
        };

        if len > MAX_FRAME_BYTES {
            error!(len, "Peer frame too large, closing connection");
            return;
        }

        let mut buf = vec![0u8; len];
        if let Err(e) = stream.read_exact(&mut buf).await {
            warn!(error = %e, "Failed to read peer frame body");
            return;
        }

        let frame: PeerFrame = match serde_json::from_slice(&buf) {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "Failed to decode peer frame");
                continue;
            }
        };

        if frame.origin == own_index {
            debug!(sequence = frame.entry.sequence, "Ignoring own frame");
            continue;
        }

        debug!(
            from = frame.origin,
            sequence = frame.entry.sequence,
            "Received entry via IPC"
        );

        dispatch_to_handlers(&handlers, &Arc::new(frame.entry)).await;
    }
}

/// IPC peer channel over Unix domain sockets.
pub struct IpcPeerChannel {
    config: IpcConfig,
    /// Handlers for entries from peers.
    handlers: Arc<RwLock<Vec<Box<dyn EntryHandler>>>>,
    /// Listener task handle.
    listener_task: Mutex<Option<JoinHandle<()>>>,
    /// One outgoing link per other worker.
    links: Vec<PeerLink>,
}

impl IpcPeerChannel {
    /// Create a new IPC peer channel.
    ///
    /// Spawns one link task per peer, so this must run inside a Tokio
    /// runtime. Links connect lazily on first publish.
    pub fn new(config: IpcConfig) -> Self {
        let links = config
            .peers
            .iter()
            .filter(|peer| peer.index != config.worker_index)
            .map(|peer| PeerLink::spawn(peer.clone(), config.link_capacity))
            .collect::<Vec<_>>();

        info!(
            worker = config.worker_index,
            peers = links.len(),
            "IPC peer channel initialized"
        );

        Self {
            config,
            handlers: Arc::new(RwLock::new(Vec::new())),
            listener_task: Mutex::new(None),
            links,
        }
    }

    /// Bind this worker's socket and start accepting peer connections.
    pub fn start_listening(&self) -> Result<()> {
        let mut task = self
            .listener_task
            .lock()
            .map_err(|_| BusError::Subscribe("listener state poisoned".to_string()))?;
        if task.is_some() {
            return Ok(());
        }

        let path = self.config.socket_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        let handlers = self.handlers.clone();
        let own_index = self.config.worker_index;

        info!(socket = %path.display(), "Starting IPC listener");

        *task = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        debug!("Accepted peer connection");
                        tokio::spawn(read_frames(stream, handlers.clone(), own_index));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept peer connection");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }));

        Ok(())
    }
}

impl Drop for IpcPeerChannel {
    fn drop(&mut self) {
        for link in &self.links {
            link.task.abort();
        }
        if let Ok(mut task) = self.listener_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                let _ = std::fs::remove_file(self.config.socket_path());
            }
        }
    }
}

#[async_trait]
impl PeerChannel for IpcPeerChannel {
    /// Queue the entry on every peer link without waiting for the writes.
    async fn publish(&self, entry: Arc<LogEntry>) -> Result<()> {
        if self.links.is_empty() {
            debug!("No peers configured, entry not forwarded");
            return Ok(());
        }

        // Serialize once
        let frame = Arc::new(encode_frame(&PeerFrame {
            origin: self.config.worker_index,
            entry: (*entry).clone(),
        })?);

        let mut missed = Vec::new();
        for link in &self.links {
            if let Err(e) = link.sender.try_send(Arc::clone(&frame)) {
                warn!(peer = link.index, error = %e, "Peer link queue rejected entry");
                missed.push(link.index);
            }
        }

        if missed.is_empty() {
            Ok(())
        } else {
            Err(BusError::Publish(format!(
                "entry {} not queued for peers {:?}",
                entry.sequence, missed
            )))
        }
    }

    async fn subscribe(&self, handler: Box<dyn EntryHandler>) -> Result<()> {
        let count = {
            let mut handlers = self.handlers.write().await;
            handlers.push(handler);
            handlers.len()
        };

        info!(handler_count = count, "Handler subscribed to IPC channel");

        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        self.start_listening()
    }
}
