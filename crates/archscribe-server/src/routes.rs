// ABOUTME: Route definitions for the archscribe HTTP API.
// ABOUTME: Assembles the health, analyze, and task history routes into one Axum Router with tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::SharedState;

/// Build the complete Axum router with all routes and shared state.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(api::analyze::analyze))
        .route(
            "/api/tasks/{id}",
            get(api::tasks::get_task).delete(api::tasks::delete_task),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler. Returns 200 OK with a simple JSON body.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppState;
    use archscribe_agent::LoopSettings;
    use archscribe_agent::testing::{ScriptedProvider, ScriptedTurn};
    use archscribe_core::{ConversationMessage, StorageMessage};
    use archscribe_store::{MemoryStorage, MessageStateHandler, MessageStorage};
    use axum::body::Body;
    use http::Request;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use ulid::Ulid;

    fn test_state(turns: Vec<ScriptedTurn>) -> (SharedState, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let state = Arc::new(AppState::new(
            Arc::new(ScriptedProvider::new(turns)),
            storage.clone(),
            LoopSettings::default(),
        ));
        (state, storage)
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (state, _) = test_state(Vec::new());
        let resp = create_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn analyze_streams_events_until_done() {
        let (state, storage) = test_state(vec![
            ScriptedTurn::new()
                .text("Finished.")
                .tool_call("attempt_completion", json!({"result": "all done"})),
        ]);
        let resp = create_router(state)
            .oneshot(
                Request::post("/api/analyze")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"message": "draw /demo", "diagramType": "data-flow"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        let task_id: Ulid = resp.headers()["x-task-id"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(
            resp.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let body = tokio::time::timeout(Duration::from_secs(5), body_text(resp))
            .await
            .expect("stream should finish");
        assert!(body.contains("event: text"));
        assert!(body.contains("event: tool_call"));
        assert!(body.contains("event: tool_result"));
        assert!(body.contains("event: done"));
        assert!(body.contains("\"status\":\"completed\""));
        assert!(storage.exists(task_id));
    }

    #[tokio::test]
    async fn analyze_rejects_empty_message() {
        let (state, _) = test_state(Vec::new());
        let resp = create_router(state)
            .oneshot(
                Request::post("/api/analyze")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"message": "  "}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn get_task_returns_stored_history() {
        let (state, storage) = test_state(Vec::new());
        let task_id = Ulid::new();
        let handler = MessageStateHandler::new(task_id, storage.clone());
        handler
            .add_api_message(StorageMessage::user_text("draw it"))
            .unwrap();
        handler
            .add_conversation_message(ConversationMessage::task("draw it"))
            .unwrap();

        let resp = create_router(state)
            .oneshot(
                Request::get(format!("/api/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["task_id"], task_id.to_string());
        assert_eq!(json["running"], false);
        assert_eq!(json["api_messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["conversation_messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_and_invalid_task_ids() {
        let (state, _) = test_state(Vec::new());
        let app = create_router(state);

        let resp = app
            .clone()
            .oneshot(
                Request::get(format!("/api/tasks/{}", Ulid::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = app
            .oneshot(
                Request::delete("/api/tasks/not-a-ulid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn delete_task_removes_history() {
        let (state, storage) = test_state(Vec::new());
        let task_id = Ulid::new();
        MessageStateHandler::new(task_id, storage.clone())
            .add_api_message(StorageMessage::user_text("x"))
            .unwrap();

        let resp = create_router(state)
            .oneshot(
                Request::delete(format!("/api/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
        assert!(!storage.exists(task_id));
    }
}
