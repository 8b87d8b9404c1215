use std::{future::Future, io, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State as AxumState, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{SystemStats, TaskServer, Worker};
use crate::tasks::types::{RuntimeOptions, Task, TaskEvent, TaskRequest};

/// Error body returned for rejected requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        warn!(%message, "rejecting request");
        ApiError {
            code: StatusCode::BAD_REQUEST.as_u16(),
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::BAD_REQUEST);
        (status, Json(self)).into_response()
    }
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct PostTaskRequest {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    #[serde(flatten)]
    pub options: RuntimeOptions,
}

impl PostTaskRequest {
    fn into_task_request(self) -> TaskRequest {
        TaskRequest::start(self.id, &self.name, &self.image).with_options(self.options)
    }
}

impl TaskServer {
    pub fn new(worker: Arc<Worker>, address: &str, port: u16) -> Self {
        Self {
            worker,
            address: address.to_string(),
            port,
        }
    }

    pub fn router(worker: Arc<Worker>) -> Router {
        Router::new()
            .route(
                "/tasks",
                get(TaskServer::get_tasks)
                    .post(TaskServer::start_task)
                    .delete(TaskServer::missing_task_id),
            )
            .route("/tasks/{task_id}", delete(TaskServer::stop_task))
            .route("/events", get(TaskServer::get_events))
            .route("/stats", get(TaskServer::get_stats))
            .with_state(worker)
    }

    async fn get_tasks(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<Task>> {
        Json(worker.list_tasks().await)
    }

    async fn get_events(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<TaskEvent>> {
        Json(worker.events().await)
    }

    async fn get_stats(AxumState(worker): AxumState<Arc<Worker>>) -> Json<SystemStats> {
        Json(worker.stats().await)
    }

    async fn start_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        payload: Result<Json<PostTaskRequest>, JsonRejection>,
    ) -> Result<StatusCode, ApiError> {
        let Json(body) = payload.map_err(|rejection| {
            ApiError::bad_request(format!(
                "Error unmarshalling body: {}",
                rejection.body_text()
            ))
        })?;

        let request = body.into_task_request();
        info!(task_id = %request.id, name = %request.name, image = %request.image, "start request submitted");
        worker.submit_task_request(request).await;
        Ok(StatusCode::NO_CONTENT)
    }

    async fn stop_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        Path(task_id): Path<String>,
    ) -> Result<StatusCode, ApiError> {
        if task_id.is_empty() {
            return Err(ApiError::bad_request("taskId is required".to_string()));
        }
        let id = Uuid::parse_str(&task_id)
            .map_err(|e| ApiError::bad_request(format!("Error parsing taskId: {e}")))?;

        info!(task_id = %id, "stop request submitted");
        worker.submit_task_request(TaskRequest::stop(id)).await;
        Ok(StatusCode::NO_CONTENT)
    }

    async fn missing_task_id() -> ApiError {
        ApiError::bad_request("taskId is required".to_string())
    }

    /// Serves until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        info!(address = %listener.local_addr()?, "task server listening");

        axum::serve(listener, TaskServer::router(self.worker))
            .with_graceful_shutdown(shutdown)
            .await
    }
}
