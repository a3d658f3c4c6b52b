//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;
mod server;
mod storage;

pub use messaging::IpcSettings;
pub use server::{ServerConfig, SessionConfig, WorkersConfig};
pub use storage::StorageConfig;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "courier.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "COURIER_CONFIG";
/// Prefix for configuration environment variables (`COURIER__SECTION__KEY`).
pub const CONFIG_ENV_PREFIX: &str = "COURIER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "COURIER_LOG";

/// Environment variable carrying a worker's index (set by the supervisor).
pub const WORKER_INDEX_ENV_VAR: &str = "COURIER_WORKER_INDEX";
/// Environment variable carrying a worker's listen port (set by the supervisor).
pub const PORT_ENV_VAR: &str = "PORT";
/// Environment variable carrying the peer list as JSON (set by the supervisor).
pub const PEERS_ENV_VAR: &str = "COURIER_PEERS";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client-facing listener configuration.
    pub server: ServerConfig,
    /// Message store configuration.
    pub storage: StorageConfig,
    /// Worker topology.
    pub workers: WorkersConfig,
    /// Cross-worker channel configuration.
    pub ipc: IpcSettings,
    /// Per-connection session behaviour.
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `courier.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.count == 0 {
            return Err(ConfigError::Invalid("workers.count must be at least 1".into()));
        }
        if self.session.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session.channel_capacity must be at least 1".into(),
            ));
        }
        if self.ipc.link_capacity == 0 {
            return Err(ConfigError::Invalid("ipc.link_capacity must be at least 1".into()));
        }
        let last_port = self.server.base_port as usize + self.workers.count - 1;
        if last_port > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "{} workers starting at port {} exceed the port range",
                self.workers.count, self.server.base_port
            )));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
