// SPDX-License-Identifier: Apache-2.0

//! Manager HTTP surface: task submission/listing/deletion and node listing.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use common::task::{State as TaskState, Task, TaskEvent};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::manager::Manager;

#[derive(Serialize)]
struct ErrorEnvelope {
    http_status_code: u16,
    message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            http_status_code: status.as_u16(),
            message: message.into(),
        }),
    )
        .into_response()
}

pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/tasks", post(submit_task).get(list_tasks))
        .route("/tasks/:id", axum::routing::delete(delete_task))
        .route("/nodes", get(list_nodes))
        .route("/stats", get(stats))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(manager)
}

async fn submit_task(State(manager): State<Arc<Manager>>, Json(event): Json<TaskEvent>) -> Response {
    let task = event.task.clone();
    info!(task_id = %task.id, "received task submission");
    manager.add_task(event).await;
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn list_tasks(State(manager): State<Arc<Manager>>) -> Response {
    match manager.get_tasks().await {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(e) => {
            warn!("listing tasks failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn delete_task(State(manager): State<Arc<Manager>>, Path(id): Path<String>) -> Response {
    let tasks = match manager.get_tasks().await {
        Ok(tasks) => tasks,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let Some(task) = tasks.into_iter().find(|t| t.id.to_string() == id) else {
        return error_response(StatusCode::NOT_FOUND, format!("no such task {id}"));
    };
    manager.add_task(TaskEvent::new(TaskState::Completed, task)).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn list_nodes(State(manager): State<Arc<Manager>>) -> Response {
    (StatusCode::OK, Json(manager.get_nodes().await)).into_response()
}

#[derive(Serialize)]
struct Stats {
    task_count: usize,
}

async fn stats(State(manager): State<Arc<Manager>>) -> Response {
    let count = manager.get_tasks().await.map(|t| t.len()).unwrap_or(0);
    (StatusCode::OK, Json(Stats { task_count: count })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use common::scheduler::RoundRobin;
    use common::store::MemoryStore;
    use tower::ServiceExt;

    fn app() -> Router {
        let manager = Arc::new(Manager::new(
            vec!["w1:8081".to_string()],
            Box::new(RoundRobin::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            536_870_912,
            10_737_418_240,
        ));
        router(manager)
    }

    #[tokio::test]
    async fn post_tasks_returns_201_with_the_task() {
        let task = Task::new("web", "nginx", 0.1, 64, 128);
        let event = TaskEvent::new(TaskState::Pending, task);
        let body = serde_json::to_vec(&event).unwrap();

        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn get_nodes_returns_configured_workers() {
        let response = app()
            .oneshot(Request::builder().uri("/nodes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let nodes: Vec<common::Node> = serde_json::from_slice(&body).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "w1:8081");
    }

    #[tokio::test]
    async fn delete_unknown_task_returns_404() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/tasks/00000000-0000-0000-0000-000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
