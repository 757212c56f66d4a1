// ABOUTME: Task submission handler: starts an agent loop and streams its events as SSE.
// ABOUTME: The loop runs in a background task so a disconnected client never cuts a task short.

use std::sync::Arc;

use archscribe_agent::{EventEmitter, LoopEvent, TaskRequest, TaskRunner, TaskStatus};
use archscribe_store::MessageStateHandler;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use ulid::Ulid;

use crate::app_state::SharedState;

pub const TASK_ID_HEADER: &str = "x-task-id";

/// Frame one loop event as an SSE event named after its type.
fn sse_event(event: &LoopEvent) -> Result<SseEvent, axum::Error> {
    SseEvent::default().event(event.name()).json_data(event)
}

fn event_stream_from_receiver(
    rx: UnboundedReceiver<LoopEvent>,
) -> impl Stream<Item = Result<SseEvent, axum::Error>> {
    UnboundedReceiverStream::new(rx).map(|event| sse_event(&event))
}

/// POST /api/analyze - Run a task and stream its events.
pub async fn analyze(
    State(state): State<SharedState>,
    Json(request): Json<TaskRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "message is required" })),
        )
            .into_response();
    }

    let task_id = Ulid::new();
    let handler = Arc::new(MessageStateHandler::new(task_id, Arc::clone(&state.storage)));
    let runner = TaskRunner::new(Arc::clone(&state.provider), handler, state.settings);
    let (emitter, rx) = EventEmitter::channel();
    tracing::info!(task_id = %task_id, diagram_type = %request.diagram_type, "analyze request accepted");

    // Hold the lock across spawn so the task cannot deregister before it is registered.
    let mut running = state.running.write().await;
    let cleanup = Arc::clone(&state);
    let task = tokio::spawn(async move {
        match runner.run(request, &emitter).await {
            Ok(outcome) => {
                tracing::info!(
                    task_id = %task_id,
                    status = ?outcome.status,
                    turns = outcome.turns,
                    "task ended"
                );
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "task aborted");
                emitter.emit(LoopEvent::Error {
                    error: e.to_string(),
                });
                emitter.emit(LoopEvent::Done {
                    status: TaskStatus::Failed,
                });
            }
        }
        cleanup.running.write().await.remove(&task_id);
    });
    running.insert(task_id, task);
    drop(running);

    let mut response = Sse::new(event_stream_from_receiver(rx))
        .keep_alive(KeepAlive::default())
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&task_id.to_string()) {
        response.headers_mut().insert(TASK_ID_HEADER, value);
    }
    response
}
