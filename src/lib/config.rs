//! Worker configuration, read from flags or the environment.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Clone, Parser)]
#[command(name = "cube-worker", about = "Runs and stops container tasks on this node")]
pub struct WorkerConfig {
    /// Worker name, used in logs and stats.
    #[arg(long, env = "CUBE_WORKER_NAME", default_value = "worker-1")]
    pub name: String,

    /// Address the task API binds to.
    #[arg(long, env = "CUBE_WORKER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, env = "CUBE_WORKER_PORT", default_value_t = 5555)]
    pub port: u16,

    /// Delay between queue polls, in milliseconds.
    #[arg(long, env = "CUBE_WORKER_INTERVAL_MS", default_value_t = 5000)]
    pub interval_ms: u64,

    /// Docker unix socket; platform default when unset.
    #[arg(long, env = "CUBE_DOCKER_SOCKET")]
    pub docker_socket: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("polling interval must be greater than zero")]
    InvalidInterval,

    #[error("worker name must not be empty")]
    EmptyName,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
