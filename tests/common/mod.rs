//! Fake runtimes and server helpers shared by the integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;

use cube_worker::tasks::runtime::Runtime;
use cube_worker::tasks::types::{Config, RunOutput, RuntimeError};
use cube_worker::worker::types::{TaskServer, Worker, WorkerHandle};

/// Maximum time any wait is allowed before the test is considered hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Always starts container `c1` on port 8080.
#[derive(Default)]
pub struct SucceedingRuntime {
    pub removed: Mutex<Vec<String>>,
}

#[async_trait]
impl Runtime for SucceedingRuntime {
    async fn run(&self, _config: &Config) -> Result<RunOutput, RuntimeError> {
        Ok(RunOutput {
            container_id: "c1".to_string(),
            port: 8080,
        })
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.removed.lock().unwrap().push(container_id.to_string());
        Ok(())
    }
}

/// Fails every call with "pull error".
pub struct FailingRuntime;

#[async_trait]
impl Runtime for FailingRuntime {
    async fn run(&self, config: &Config) -> Result<RunOutput, RuntimeError> {
        Err(RuntimeError::ImagePull {
            image: config.image.clone(),
            message: "pull error".to_string(),
        })
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        Err(RuntimeError::Remove {
            container_id: container_id.to_string(),
            message: "pull error".to_string(),
        })
    }
}

pub struct TestServer {
    pub base_url: String,
    pub worker: Arc<Worker>,
    pub client: reqwest::Client,
}

/// Serves the task API on a random port without a processing loop.
pub async fn start_server(runtime: Arc<dyn Runtime>) -> TestServer {
    let worker = Arc::new(Worker::new("test-worker", runtime));
    let app = TaskServer::router(worker.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://127.0.0.1:{port}"),
        worker,
        client: reqwest::Client::new(),
    }
}

/// Serves the task API and runs the processing loop every 10ms.
pub async fn start_worker(runtime: Arc<dyn Runtime>) -> (TestServer, WorkerHandle) {
    let server = start_server(runtime).await;
    let handle = WorkerHandle::spawn(server.worker.clone(), Duration::from_millis(10));
    (server, handle)
}
