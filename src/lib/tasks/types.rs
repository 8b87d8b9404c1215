use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Pending,
        State::Scheduled,
        State::Running,
        State::Completed,
        State::Failed,
    ];

    /// Completed and Failed tasks accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Resource limits and runtime settings a caller may attach to a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// CPU cores, fractional.
    pub cpu: f64,
    /// Memory limit in bytes, 0 for unlimited.
    pub memory: i64,
    pub disk: i64,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// Container ports such as `80/tcp`.
    pub exposed_ports: Vec<String>,
    pub restart_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub state: State,
    pub container_id: Option<String>,
    pub port: u16,
    #[serde(flatten)]
    pub options: RuntimeOptions,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn config(&self) -> Config {
        Config {
            name: self.name.clone(),
            image: self.image.clone(),
            cpu: self.options.cpu,
            memory: self.options.memory,
            disk: self.options.disk,
            env: self.options.env.clone(),
            exposed_ports: self.options.exposed_ports.clone(),
            restart_policy: self.options.restart_policy.clone(),
        }
    }
}

/// A request to move a task toward `required_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub required_state: State,
    #[serde(flatten)]
    pub options: RuntimeOptions,
}

impl TaskRequest {
    pub fn start(id: Uuid, name: &str, image: &str) -> Self {
        TaskRequest {
            id,
            name: name.to_string(),
            image: image.to_string(),
            required_state: State::Scheduled,
            options: RuntimeOptions::default(),
        }
    }

    pub fn stop(id: Uuid) -> Self {
        TaskRequest {
            id,
            name: String::new(),
            image: String::new(),
            required_state: State::Completed,
            options: RuntimeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Derives a fresh `Pending` task; runtime fields start zeroed.
    pub fn task(&self) -> Task {
        Task {
            id: self.id,
            name: self.name.clone(),
            image: self.image.clone(),
            state: State::Pending,
            container_id: None,
            port: 0,
            options: self.options.clone(),
            start_time: None,
            finish_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: State,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(task: &Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state: task.state,
            timestamp: Utc::now(),
            task: task.clone(),
        }
    }
}

/// Runtime-agnostic description of the workload to start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub name: String,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub exposed_ports: Vec<String>,
    pub restart_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub container_id: String,
    /// Host port bound to the first exposed port, 0 when none.
    pub port: u16,
}

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("failed to connect to container runtime: {0}")]
    Connect(String),

    #[error("error pulling image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("error creating container from image {image}: {message}")]
    Create { image: String, message: String },

    #[error("error starting container {container_id}: {message}")]
    Start { container_id: String, message: String },

    #[error("error inspecting container {container_id}: {message}")]
    Inspect { container_id: String, message: String },

    #[error("error stopping container {container_id}: {message}")]
    Stop { container_id: String, message: String },

    #[error("error removing container {container_id}: {message}")]
    Remove { container_id: String, message: String },

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_task_is_pending_with_zeroed_runtime_fields() {
        let id = Uuid::new_v4();
        let task = TaskRequest::start(id, "web", "nginx:latest").task();

        assert_eq!(task.id, id);
        assert_eq!(task.name, "web");
        assert_eq!(task.image, "nginx:latest");
        assert_eq!(task.state, State::Pending);
        assert_eq!(task.container_id, None);
        assert_eq!(task.port, 0);
        assert!(task.start_time.is_none());
        assert!(task.finish_time.is_none());
    }

    #[test]
    fn config_carries_name_image_and_options() {
        let options = RuntimeOptions {
            cpu: 0.5,
            memory: 64 * 1024 * 1024,
            env: vec!["POSTGRES_USER=cube".to_string()],
            exposed_ports: vec!["5432/tcp".to_string()],
            restart_policy: "always".to_string(),
            ..Default::default()
        };
        let task = TaskRequest::start(Uuid::new_v4(), "db", "postgres:13")
            .with_options(options)
            .task();

        let config = task.config();
        assert_eq!(config.name, "db");
        assert_eq!(config.image, "postgres:13");
        assert_eq!(config.cpu, 0.5);
        assert_eq!(config.memory, 64 * 1024 * 1024);
        assert_eq!(config.env, vec!["POSTGRES_USER=cube"]);
        assert_eq!(config.exposed_ports, vec!["5432/tcp"]);
        assert_eq!(config.restart_policy, "always");
    }

    #[test]
    fn stop_request_targets_completed() {
        let id = Uuid::new_v4();
        let request = TaskRequest::stop(id);
        assert_eq!(request.id, id);
        assert_eq!(request.required_state, State::Completed);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        let terminal: Vec<State> = State::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![State::Completed, State::Failed]);
    }

    #[test]
    fn task_serializes_state_by_name() {
        let task = TaskRequest::start(Uuid::new_v4(), "web", "nginx").task();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["state"], "Pending");
        assert_eq!(json["port"], 0);
        assert!(json["container_id"].is_null());
    }
}
