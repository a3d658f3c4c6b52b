//! IPC-based peer channel for the multi-process worker topology.
//!
//! Substitutes for an external broker using Unix domain sockets.
//!
//! Architecture (full mesh):
//! ```text
//!   ┌──────────┐  peer-1.sock  ┌──────────┐
//!   │ worker 0 │──────────────▶│ worker 1 │
//!   │          │◀──────────────│          │
//!   └──────────┘  peer-0.sock  └──────────┘
//!        │  ▲                      │  ▲
//!        ▼  │ peer-0.sock          ▼  │ peer-1.sock
//!   ┌──────────┐                   ...
//!   │ worker 2 │
//!   └──────────┘
//! ```
//!
//! Each worker listens on its own socket and keeps one outgoing link per
//! peer. A connection carries length-prefixed JSON [`PeerFrame`]s.
//!
//! Usage:
//! 1. Supervisor creates a `PeerRegistry` and registers every worker
//! 2. Supervisor passes `registry.peers_to_json()` to each worker via env var
//! 3. Workers build `IpcPeerChannel::new(IpcConfig::from_env(..))`
//! 4. Workers call `start_consuming()` to listen for peer frames
//!
//! [`PeerFrame`]: crate::bus::PeerFrame

mod client;
mod registry;

pub use client::{IpcConfig, IpcPeerChannel};
pub use registry::{PeerInfo, PeerRegistry};

/// Default base path for IPC sockets.
pub const DEFAULT_BASE_PATH: &str = "/tmp/courier";

/// Socket name prefix for workers.
pub const PEER_SOCKET_PREFIX: &str = "peer-";

/// Largest frame accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Socket path for a worker under a base path.
pub fn socket_path(base_path: &std::path::Path, worker_index: usize) -> std::path::PathBuf {
    base_path.join(format!("{}{}.sock", PEER_SOCKET_PREFIX, worker_index))
}
