use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use sysinfo::System;
use thiserror::Error;
use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::queue::Queue;
use crate::tasks::{
    runtime::Runtime,
    types::{RuntimeError, State, Task, TaskEvent, TaskRequest},
};

/// Owns the task registry and request queue of one node.
///
/// The processing loop is the only writer of `db`; HTTP handlers only
/// enqueue requests and read snapshots.
pub struct Worker {
    pub name: String,
    pub(crate) queue: Mutex<Queue<TaskRequest>>,
    pub(crate) db: RwLock<HashMap<Uuid, Task>>,
    pub(crate) events: RwLock<Vec<TaskEvent>>,
    pub(crate) runtime: Arc<dyn Runtime>,
    /// Held for a whole `process_one` step.
    pub(crate) processing: Mutex<()>,
    pub(crate) sysinfo: Mutex<System>,
}

/// Outcome of one successful processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    Idle,
    Started {
        id: Uuid,
        container_id: String,
        port: u16,
    },
    Stopped {
        id: Uuid,
    },
}

/// Background processing loop plus its stop signal.
pub struct WorkerHandle {
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) join: JoinHandle<()>,
}

pub struct TaskServer {
    pub worker: Arc<Worker>,
    pub address: String,
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SystemStats {
    pub worker: String,
    pub cpu_usage: f32,
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,
    pub total_swap_mb: u64,
    pub used_swap_mb: u64,
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
    pub disk_usage: f32,
    pub task_count: u64,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("task {0} already exists")]
    TaskAlreadyExists(Uuid),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("task {id} cannot move from {from} to {to}")]
    IllegalTransition { id: Uuid, from: State, to: State },

    #[error("task transition not implemented: {0}")]
    TransitionNotImplemented(State),

    #[error("task {0} is running without a container id")]
    MissingContainer(Uuid),

    #[error("runtime error for task {id}: {source}")]
    Runtime {
        id: Uuid,
        #[source]
        source: RuntimeError,
    },
}

pub type WorkerResult<T> = Result<T, WorkerError>;
