use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::stats::Stats;
use super::worker::Worker;
use crate::task::types::{State, TaskEvent};

/// Error body returned alongside non-2xx responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrResponse {
    pub http_status_code: u16,
    pub message: String,
}

impl ErrResponse {
    pub fn new(http_status_code: u16, message: impl Into<String>) -> Self {
        ErrResponse {
            http_status_code,
            message: message.into(),
        }
    }
}

type SharedWorker = Arc<Mutex<Worker>>;

/// HTTP surface of a worker: enqueue events, list tasks, serve stats.
pub struct TaskServer {
    pub worker: SharedWorker,
    pub address: String,
    pub port: u16,
}

impl TaskServer {
    pub fn new(worker: SharedWorker, address: &str, port: u16) -> Self {
        TaskServer {
            worker,
            address: address.to_string(),
            port,
        }
    }

    async fn get_tasks(AxumState(worker): AxumState<SharedWorker>) -> Response {
        match worker.lock().await.get_tasks() {
            Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
            Err(e) => {
                error!(error = %e, "error listing tasks");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrResponse::new(500, e.to_string())),
                )
                    .into_response()
            }
        }
    }

    async fn start_task(AxumState(worker): AxumState<SharedWorker>, body: Bytes) -> Response {
        let te: TaskEvent = match serde_json::from_slice(&body) {
            Ok(te) => te,
            Err(e) => {
                warn!(error = %e, "error unmarshalling body");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrResponse::new(400, format!("error unmarshalling body: {e}"))),
                )
                    .into_response();
            }
        };

        let task = te.task.clone();
        worker.lock().await.add_task(te);
        info!(task = %task.id, "task queued for execution");
        (StatusCode::CREATED, Json(task)).into_response()
    }

    async fn stop_task(
        AxumState(worker): AxumState<SharedWorker>,
        Path(task_id): Path<String>,
    ) -> Response {
        let Ok(id) = Uuid::parse_str(&task_id) else {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrResponse::new(400, format!("invalid task id {task_id}"))),
            )
                .into_response();
        };

        let mut guard = worker.lock().await;
        let task = match guard.db.get(&id.to_string()) {
            Ok(task) => task,
            Err(_) => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(ErrResponse::new(404, format!("task {id} not found"))),
                )
                    .into_response();
            }
        };

        let te = TaskEvent {
            id: Uuid::new_v4(),
            state: State::Completed,
            timestamp: Utc::now(),
            task,
        };
        guard.add_task(te);

        info!(task = %id, "task queued for stopping");
        StatusCode::NO_CONTENT.into_response()
    }

    async fn get_stats(AxumState(worker): AxumState<SharedWorker>) -> Json<Stats> {
        Json(worker.lock().await.stats.clone())
    }

    pub async fn start_server(self) -> std::io::Result<()> {
        let app = Router::new()
            .route("/tasks", get(Self::get_tasks).post(Self::start_task))
            .route("/tasks/{id}", delete(Self::stop_task))
            .route("/stats", get(Self::get_stats))
            .with_state(self.worker);

        info!(address = %self.address, port = self.port, "starting worker api");
        let listener = TcpListener::bind(format!("{}:{}", self.address, self.port)).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(crate::shutdown_signal())
            .await
    }
}
