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
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::manager::Manager;
use crate::task::types::{State, TaskEvent};
use crate::worker::api::ErrResponse;

type SharedManager = Arc<Mutex<Manager>>;

/// HTTP surface of the manager: task submission, listing, and deletion.
/// Deletion goes through the normal dispatch path as a Completed event
/// rather than calling the runtime directly.
pub struct ManagerServer {
    pub manager: SharedManager,
    pub address: String,
    pub port: u16,
}

impl ManagerServer {
    pub fn new(manager: SharedManager, address: &str, port: u16) -> Self {
        ManagerServer {
            manager,
            address: address.to_string(),
            port,
        }
    }

    async fn start_task(AxumState(manager): AxumState<SharedManager>, body: Bytes) -> Response {
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
        manager.lock().await.add_task(te);
        info!(task = %task.id, "added task");
        (StatusCode::CREATED, Json(task)).into_response()
    }

    async fn get_tasks(AxumState(manager): AxumState<SharedManager>) -> Response {
        match manager.lock().await.get_tasks() {
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

    async fn stop_task(
        AxumState(manager): AxumState<SharedManager>,
        Path(task_id): Path<String>,
    ) -> Response {
        let Ok(id) = Uuid::parse_str(&task_id) else {
            warn!(%task_id, "invalid task id in request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrResponse::new(400, format!("invalid task id {task_id}"))),
            )
                .into_response();
        };

        let mut guard = manager.lock().await;
        let task = match guard.task_db.get(&id.to_string()) {
            Ok(task) => task,
            Err(_) => {
                warn!(task = %id, "no task with this id found");
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
        guard.add_task(te.clone());

        info!(event = %te.id, task = %id, "added event to stop task");
        StatusCode::NO_CONTENT.into_response()
    }

    pub async fn start_server(self) -> std::io::Result<()> {
        let app = Router::new()
            .route("/tasks", get(Self::get_tasks).post(Self::start_task))
            .route("/tasks/{task_id}", delete(Self::stop_task))
            .with_state(self.manager);

        info!(address = %self.address, port = self.port, "starting manager api");
        let listener = TcpListener::bind(format!("{}:{}", self.address, self.port)).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(crate::shutdown_signal())
            .await
    }
}
