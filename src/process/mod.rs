//! Process management for spawning worker processes.
//!
//! Handles spawning one child per worker, passing its identity and the
//! peer topology as environment variables, and managing its lifecycle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use backon::Retryable;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::config::{PEERS_ENV_VAR, PORT_ENV_VAR, WORKER_INDEX_ENV_VAR};
use crate::utils::retry::worker_ready_backoff;

/// Name of the worker binary, expected next to the supervisor.
pub const WORKER_BINARY: &str = "courier-worker";

/// Environment variables passed to a spawned worker.
pub struct WorkerEnv {
    /// Worker index, `0..count`.
    pub index: usize,
    /// Port the worker listens on for client connections.
    pub port: u16,
    /// JSON list of every worker's peer socket.
    pub peers_json: String,
}

impl WorkerEnv {
    /// Convert to environment variable map.
    pub fn to_env_vars(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(WORKER_INDEX_ENV_VAR.to_string(), self.index.to_string());
        env.insert(PORT_ENV_VAR.to_string(), self.port.to_string());
        env.insert(PEERS_ENV_VAR.to_string(), self.peers_json.clone());
        env
    }
}

/// Locate the worker binary beside the running executable.
pub fn worker_executable() -> std::io::Result<PathBuf> {
    let current = std::env::current_exe()?;
    let dir = current.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(WORKER_BINARY))
}

/// Manages a spawned child process.
pub struct ManagedProcess {
    child: Child,
    label: String,
    exited: bool,
}

impl ManagedProcess {
    /// Spawn `executable` with `args` and the worker's environment.
    ///
    /// No shell interpretation - direct exec. The parent's environment is
    /// inherited, so configuration overrides reach every worker.
    pub fn spawn(executable: &Path, args: &[String], env: &WorkerEnv) -> std::io::Result<Self> {
        let label = format!("worker-{}", env.index);
        info!(executable = %executable.display(), worker = env.index, "Spawning worker process");

        let env_vars = env.to_env_vars();
        debug!(?env_vars, "Process environment");

        let mut cmd = Command::new(executable);
        cmd.args(args)
            .envs(env_vars)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| {
            error!(executable = %executable.display(), error = %e, "Failed to spawn process");
            e
        })?;

        info!(pid = ?child.id(), worker = env.index, "Worker process spawned");

        Ok(Self {
            child,
            label,
            exited: false,
        })
    }

    /// Check if the process is still running. Logs the exit once.
    pub fn is_running(&mut self) -> bool {
        if self.exited {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(%status, process = %self.label, "Process exited");
                self.exited = true;
                false
            }
            Err(e) => {
                error!(error = %e, process = %self.label, "Failed to check process status");
                false
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Kill the process.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        if self.exited {
            return Ok(());
        }
        info!(pid = ?self.child.id(), process = %self.label, "Killing process");
        self.exited = true;
        self.child.kill().await
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = ?self.child.id(), process = %self.label, "Killing orphaned process on drop");
            let _ = self.child.start_kill();
        }
    }
}

/// Wait for a worker to accept TCP connections on `address`.
pub async fn wait_for_ready(address: SocketAddr) -> std::io::Result<()> {
    (|| async { TcpStream::connect(address).await })
        .retry(worker_ready_backoff())
        .notify(|e, delay| debug!(%address, error = %e, ?delay, "Worker not ready, retrying"))
        .await?;
    info!(%address, "Worker is ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_env_to_env_vars() {
        let env = WorkerEnv {
            index: 2,
            port: 3002,
            peers_json: "[]".to_string(),
        };

        let vars = env.to_env_vars();
        assert_eq!(vars.get(WORKER_INDEX_ENV_VAR), Some(&"2".to_string()));
        assert_eq!(vars.get(PORT_ENV_VAR), Some(&"3002".to_string()));
        assert_eq!(vars.get(PEERS_ENV_VAR), Some(&"[]".to_string()));
    }

    #[test]
    fn test_worker_executable_is_sibling() {
        let exe = worker_executable().unwrap();
        assert_eq!(exe.file_name().unwrap(), WORKER_BINARY);
        assert_eq!(exe.parent(), std::env::current_exe().unwrap().parent());
    }

    #[tokio::test]
    async fn test_spawn_and_kill() {
        let env = WorkerEnv {
            index: 0,
            port: 0,
            peers_json: "[]".to_string(),
        };
        let mut process =
            ManagedProcess::spawn(Path::new("sleep"), &["30".to_string()], &env).unwrap();

        assert!(process.is_running());
        process.kill().await.unwrap();
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let env = WorkerEnv {
            index: 0,
            port: 0,
            peers_json: "[]".to_string(),
        };
        assert!(ManagedProcess::spawn(Path::new("/nonexistent/courier"), &[], &env).is_err());
    }

    #[tokio::test]
    async fn test_wait_for_ready_on_listening_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        wait_for_ready(address).await.unwrap();
    }
}
