use async_trait::async_trait;

use super::types::{Config, RunOutput, RuntimeError};

/// The container runtime as seen by the worker.
///
/// `run` is not idempotent: calling it twice with the same config may start
/// two containers, so the worker calls it at most once per task start.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Pulls, creates and starts a container for `config`.
    async fn run(&self, config: &Config) -> Result<RunOutput, RuntimeError>;

    /// Stops and removes the container identified by `container_id`.
    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;
}
