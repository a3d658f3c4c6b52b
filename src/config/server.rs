//! Server, topology and session configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Client-facing listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port of worker 0; worker `i` listens on `base_port + i`.
    pub base_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            base_port: 3000,
        }
    }
}

impl ServerConfig {
    /// Listen port for a worker.
    pub fn port_for(&self, worker_index: usize) -> u16 {
        self.base_port.saturating_add(worker_index as u16)
    }
}

/// Worker topology configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of worker processes the supervisor starts.
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Per-connection session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a disconnected session stays resumable.
    pub recovery_window_secs: u64,
    /// Live entries buffered per session before it lags.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recovery_window_secs: 120,
            channel_capacity: 1024,
        }
    }
}

impl SessionConfig {
    pub fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.recovery_window_secs)
    }
}
