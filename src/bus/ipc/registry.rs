//! Peer socket registry for the supervisor.
//!
//! Assigns each worker its socket path and hands the full list to every
//! worker. The registry does not relay traffic; workers connect directly.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::socket_path;

/// Peer info passed to workers via env var.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Worker index.
    pub index: usize,
    /// Path of the worker's listening socket.
    pub socket_path: PathBuf,
}

/// Peer registry - assigns and cleans up worker sockets.
///
/// Used by the supervisor to:
/// 1. Register workers and clear stale socket files
/// 2. Get the peer list to pass to workers via env var
/// 3. Clean up sockets on shutdown
pub struct PeerRegistry {
    base_path: PathBuf,
    peers: BTreeMap<usize, PeerInfo>,
}

impl PeerRegistry {
    /// Create a registry rooted at `base_path`, creating the directory.
    pub fn new(base_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            peers: BTreeMap::new(),
        })
    }

    /// Get the base path for sockets.
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// Register a worker, removing any socket left by a previous run.
    pub fn register_worker(&mut self, index: usize) -> std::io::Result<PeerInfo> {
        let path = socket_path(&self.base_path, index);

        if path.exists() {
            fs::remove_file(&path)?;
        }

        info!(worker = index, socket = %path.display(), "Registered worker");

        let info = PeerInfo {
            index,
            socket_path: path,
        };
        self.peers.insert(index, info.clone());

        Ok(info)
    }

    /// Unregister a worker and remove its socket.
    pub fn unregister_worker(&mut self, index: usize) {
        if let Some(info) = self.peers.remove(&index) {
            if info.socket_path.exists() {
                let _ = fs::remove_file(&info.socket_path);
            }
            info!(worker = index, "Unregistered worker");
        }
    }

    /// All registered workers, ordered by index.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.values().cloned().collect()
    }

    /// Serialize peer list to JSON for env var.
    pub fn peers_to_json(&self) -> String {
        serde_json::to_string(&self.peers()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Remove all worker sockets.
    pub fn cleanup(&self) {
        for info in self.peers.values() {
            if info.socket_path.exists() {
                let _ = fs::remove_file(&info.socket_path);
            }
        }
        info!("Cleaned up {} worker sockets", self.peers.len());
    }
}

impl Drop for PeerRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_worker_paths() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = PeerRegistry::new(temp_dir.path()).unwrap();

        let info = registry.register_worker(2).unwrap();

        assert_eq!(info.index, 2);
        assert!(info.socket_path.to_string_lossy().ends_with("peer-2.sock"));
    }

    #[test]
    fn test_register_removes_stale_socket() {
        let temp_dir = TempDir::new().unwrap();
        let stale = socket_path(temp_dir.path(), 0);
        fs::write(&stale, b"").unwrap();

        let mut registry = PeerRegistry::new(temp_dir.path()).unwrap();
        registry.register_worker(0).unwrap();

        assert!(!stale.exists());
    }

    #[test]
    fn test_unregister_removes_socket() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = PeerRegistry::new(temp_dir.path()).unwrap();
        let info = registry.register_worker(0).unwrap();
        fs::write(&info.socket_path, b"").unwrap();

        registry.unregister_worker(0);

        assert!(!info.socket_path.exists());
        assert!(registry.peers().is_empty());
    }

    #[test]
    fn test_peers_to_json_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = PeerRegistry::new(temp_dir.path()).unwrap();
        registry.register_worker(1).unwrap();
        registry.register_worker(0).unwrap();

        let parsed: Vec<PeerInfo> = serde_json::from_str(&registry.peers_to_json()).unwrap();

        assert_eq!(parsed, registry.peers());
        assert_eq!(parsed[0].index, 0);
    }
}
