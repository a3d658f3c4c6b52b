//! Storage configuration types.

use serde::Deserialize;

/// Message store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite database file shared by all workers.
    pub path: String,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Connections per worker pool.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "chat.db".to_string(),
            busy_timeout_ms: 5000,
            max_connections: 4,
        }
    }
}
