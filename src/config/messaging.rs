//! Cross-worker messaging configuration types.

use std::path::PathBuf;

use serde::Deserialize;

use crate::bus::ipc::DEFAULT_BASE_PATH;

/// Unix-socket peer mesh configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpcSettings {
    /// Directory holding one socket per worker.
    pub base_path: PathBuf,
    /// Entries queued per outgoing peer link before broadcasts are dropped.
    pub link_capacity: usize,
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(DEFAULT_BASE_PATH),
            link_capacity: 1024,
        }
    }
}
