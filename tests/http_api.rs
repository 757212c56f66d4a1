// ABOUTME: HTTP smoke test for the archscribe server: analyze, read back the stored task, delete it.
// ABOUTME: Drives the router in-process with oneshot and a scripted provider over file storage.

use std::sync::Arc;
use std::time::Duration;

use archscribe_agent::LoopSettings;
use archscribe_agent::testing::{ScriptedProvider, ScriptedTurn};
use archscribe_server::{AppState, create_router};
use archscribe_store::{FileStorage, MessageStorage};
use axum::body::Body;
use http::Request;
use serde_json::json;
use tower::ServiceExt;
use ulid::Ulid;

async fn body_text(resp: axum::response::Response) -> String {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn analyze_then_inspect_then_delete() {
    let home = tempfile::TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::new(home.path()));
    let provider = ScriptedProvider::new(vec![
        ScriptedTurn::new().tool_call(
            "display_diagram",
            json!({"xml": r#"<mxCell id="2" value="App" vertex="1" parent="1"><mxGeometry x="40" y="40" width="120" height="60" as="geometry"/></mxCell>"#}),
        ),
        ScriptedTurn::new().tool_call("attempt_completion", json!({"result": "One box."})),
    ]);
    let state = Arc::new(AppState::new(
        Arc::new(provider),
        storage.clone(),
        LoopSettings::default(),
    ));
    let app = create_router(state);

    // 1. POST /api/analyze and read the whole event stream
    let resp = app
        .clone()
        .oneshot(
            Request::post("/api/analyze")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"message": "Draw /demo", "diagramType": "component-structure"})
                        .to_string(),
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
    let stream = tokio::time::timeout(Duration::from_secs(5), body_text(resp))
        .await
        .expect("stream should finish");

    let names: Vec<&str> = stream
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(
        names,
        vec!["tool_call", "diagram", "tool_result", "tool_call", "tool_result", "done"]
    );
    assert!(stream.contains("mxGraphModel"));

    // 2. GET /api/tasks/{id} returns the persisted history
    let resp = app
        .clone()
        .oneshot(
            Request::get(format!("/api/tasks/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let history: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    // task, two assistant turns, two tool results
    assert_eq!(history["api_messages"].as_array().unwrap().len(), 5);
    let kinds: Vec<&str> = history["conversation_messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"diagram"));
    assert!(kinds.contains(&"completion_result"));

    // 3. DELETE /api/tasks/{id} removes it
    let resp = app
        .clone()
        .oneshot(
            Request::delete(format!("/api/tasks/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert!(!storage.exists(task_id));

    let resp = app
        .oneshot(
            Request::get(format!("/api/tasks/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
