// ABOUTME: Stored task history handlers: read a task's persisted messages or delete them.
// ABOUTME: Deleting a running task aborts its loop before the stored history is removed.

use std::sync::Arc;

use archscribe_core::{ConversationMessage, DeletedRange, StorageMessage};
use archscribe_store::MessageStateHandler;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use ulid::Ulid;

use crate::app_state::SharedState;

/// Response body for a stored task.
#[derive(Debug, Serialize)]
pub struct TaskHistory {
    pub task_id: String,
    pub running: bool,
    pub deleted_range: Option<DeletedRange>,
    pub api_messages: Vec<StorageMessage>,
    pub conversation_messages: Vec<ConversationMessage>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// GET /api/tasks/{id} - Load a task's persisted history.
pub async fn get_task(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let Ok(task_id) = id.parse::<Ulid>() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid task id");
    };
    if !state.storage.exists(task_id) {
        return error_response(StatusCode::NOT_FOUND, "task not found");
    }

    let handler = MessageStateHandler::new(task_id, Arc::clone(&state.storage));
    if let Err(e) = handler.load_from_disk() {
        tracing::error!(task_id = %task_id, error = %e, "failed to load task history");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load task history");
    }
    let snapshot = handler.snapshot();

    Json(TaskHistory {
        task_id: task_id.to_string(),
        running: state.is_running(task_id).await,
        deleted_range: snapshot.deleted_range,
        api_messages: snapshot.api_messages,
        conversation_messages: snapshot.conversation_messages,
    })
    .into_response()
}

/// DELETE /api/tasks/{id} - Abort the task if it is running and remove its history.
pub async fn delete_task(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let Ok(task_id) = id.parse::<Ulid>() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid task id");
    };

    let aborted = match state.running.write().await.remove(&task_id) {
        Some(task) => {
            task.abort();
            true
        }
        None => false,
    };
    if !aborted && !state.storage.exists(task_id) {
        return error_response(StatusCode::NOT_FOUND, "task not found");
    }

    if let Err(e) = state.storage.delete(task_id) {
        tracing::error!(task_id = %task_id, error = %e, "failed to delete task history");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete task history");
    }
    tracing::info!(task_id = %task_id, aborted, "task deleted");
    StatusCode::NO_CONTENT.into_response()
}
