//! HTTP surface tests driven through the router

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use keel_coordinator::api::{AppState, create_router};
use keel_coordinator::config::{ConfigHandle, CoordinatorConfig};
use keel_coordinator::repository::MemoryStore;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn router() -> Router {
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ConfigHandle::new(CoordinatorConfig::default(), None)),
    );
    create_router(state)
}

fn post(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn pipeline_body() -> Value {
    json!({
        "definition": {
            "name": "ci",
            "jobs": [
                { "name": "build", "steps": [{ "name": "make", "run": "make" }] }
            ]
        },
        "trigger": {
            "repository": "acme/app",
            "ref": "refs/heads/main",
            "clone_url": "http://git.local/acme/app.git"
        }
    })
}

async fn register(router: &Router, id: &str) -> String {
    let (status, body) = send(
        router,
        post("/api/agents/register", json!({ "agent_id": id }), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let response = router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_agent_rpc_requires_token() {
    let router = router();

    let (status, body) = send(&router, post("/api/agents/claim", json!({}), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unknown_agent");

    let unknown = uuid::Uuid::new_v4().to_string();
    let (status, _) = send(
        &router,
        post("/api/agents/heartbeat", json!({}), Some(&unknown)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_definition_is_bad_request() {
    let router = router();
    let body = json!({
        "definition": { "name": "ci", "jobs": [] },
        "trigger": { "repository": "acme/app", "ref": "main" }
    });

    let (status, body) = send(&router, post("/api/pipelines", body, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_definition");
    assert!(body["error"].as_str().unwrap().contains("at least one job"));
}

#[tokio::test]
async fn test_claim_and_report_over_http() {
    let router = router();
    let (status, enqueued) = send(&router, post("/api/pipelines", pipeline_body(), None)).await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = enqueued["job_ids"][0].as_str().unwrap().to_string();

    let holder = register(&router, "a1").await;
    let other = register(&router, "a2").await;

    let (status, claim) = send(&router, post("/api/agents/claim", json!({}), Some(&holder))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claim["assignment"]["job"]["id"], job_id.as_str());
    assert_eq!(
        claim["assignment"]["trigger"]["clone_url"],
        "http://git.local/acme/app.git"
    );

    let uri = format!("/api/jobs/{}/status", job_id);
    let (status, body) = send(
        &router,
        post(&uri, json!({ "status": "Running" }), Some(&other)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "not_owner");

    let (status, ack) = send(
        &router,
        post(
            &uri,
            json!({
                "status": "Running",
                "logs": [{ "timestamp": "2026-01-01T00:00:00Z", "level": "Info", "message": "hello" }]
            }),
            Some(&holder),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "Running");

    let (status, logs) = send(&router, get(&format!("/api/jobs/{}/logs", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs[0]["message"], "hello");

    let (status, agents) = send(&router, get("/api/agents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agents.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_pipeline_is_not_found() {
    let router = router();
    let uri = format!("/api/pipelines/{}", uuid::Uuid::new_v4());
    let (status, body) = send(&router, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_reload_without_config_file() {
    let router = router();
    let (status, body) = send(&router, post("/api/admin/reload", json!({}), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_config");
}

#[tokio::test]
async fn test_network_info() {
    let router = router();
    let (status, body) = send(&router, get("/api/network")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["clone_base_url"].is_null());
}
