//! End-to-end tests over the HTTP router

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use vigil::config::{StorageConfig, VigilConfig};
use vigil::server::{self, AppState};
use vigil::telemetry::StaticProbe;
use vigil::Services;

const API_KEY: &str = "user-key";
const ADMIN: &str = "admin-key";

struct Harness {
    app: Router,
    services: Services,
    _root: TempDir,
}

async fn harness(short_cap: u32) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let mut config = VigilConfig {
        storage: StorageConfig::rooted_at(root.path()),
        ..VigilConfig::default()
    };
    config.auth.api_key = API_KEY.to_string();
    config.auth.admin_token = ADMIN.to_string();
    config.rate_limit.short_cap = short_cap;
    config.server.request_logging = false;
    config.storage.ensure_dirs().unwrap();
    std::fs::write(config.storage.model_dir.join("tiny.gguf"), b"GGUF").unwrap();

    let services = Services::start_with_probe(config, Box::new(StaticProbe::with_usage(10.0, 10.0)))
        .await
        .unwrap();
    let state = Arc::new(AppState::new(
        Arc::clone(&services.gateway),
        Arc::clone(&services.janitor),
        services.config.auth.clone(),
        services.config.rate_limit.client_key,
    ));
    let app = server::router(state, &services.config.server);
    Harness {
        app,
        services,
        _root: root,
    }
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_is_open_and_tagged() {
    let h = harness(60).await;
    let response = h
        .app
        .clone()
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["model"]["loaded"], false);
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let h = harness(60).await;
    let mut req = request("GET", "/health", None, None);
    req.headers_mut()
        .insert("x-request-id", "trace-123".parse().unwrap());
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-123");
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let h = harness(60).await;
    let response = h
        .app
        .clone()
        .oneshot(request("GET", "/api/v1/models", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "unauthorized");

    let stats = h.services.gateway.telemetry().stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.errors_by_category["unauthorized"], 1);
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_api_key_cannot_reach_admin_routes() {
    let h = harness(60).await;
    let response = h
        .app
        .clone()
        .oneshot(request("POST", "/api/v1/models/tiny/load", Some(API_KEY), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.services.gateway.models().state().loaded_id, None);
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_chat_before_load_is_unavailable() {
    let h = harness(60).await;
    let response = h
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/chat",
            Some(API_KEY),
            Some(json!({"message": "hello"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_load_then_chat() {
    let h = harness(60).await;
    let response = h
        .app
        .clone()
        .oneshot(request("POST", "/api/v1/models/tiny/load", Some(ADMIN), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["modelId"], "tiny");
    assert_eq!(body["status"], "loaded");

    let response = h
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/chat",
            Some(API_KEY),
            Some(json!({"message": "one two three four", "parameters": {"maxLength": 2}})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    let body = json_body(response).await;
    assert_eq!(body["response"], "one two");
    assert_eq!(body["model"], "tiny");
    assert_eq!(body["parametersUsed"]["maxLength"], 2);

    // Per-call overrides are never stored.
    let response = h
        .app
        .clone()
        .oneshot(request("GET", "/api/v1/models/tiny/parameters", Some(API_KEY), None))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_ne!(body["parameters"]["maxLength"], 2);
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_parameter_patch_names_field() {
    let h = harness(60).await;
    let response = h
        .app
        .clone()
        .oneshot(request(
            "PATCH",
            "/api/v1/models/tiny/parameters",
            Some(ADMIN),
            Some(json!({"parameters": {"topP": 3.0}})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["field"], "topP");
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rate_limit_returns_retry_after() {
    let h = harness(2).await;
    for _ in 0..2 {
        let response = h
            .app
            .clone()
            .oneshot(request("GET", "/api/v1/models", Some(API_KEY), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = h
        .app
        .clone()
        .oneshot(request("GET", "/api/v1/models", Some(API_KEY), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);

    // A different credential has its own budget.
    let response = h
        .app
        .clone()
        .oneshot(request("GET", "/api/v1/models", Some(ADMIN), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_bodies_are_counted() {
    let h = harness(60).await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/chat")
        .header("authorization", format!("Bearer {API_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["field"], "body");

    let response = h
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/models/download",
            Some(ADMIN),
            Some(json!({"name": "org/model", "format": "tflite"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stats = h.services.gateway.telemetry().stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.errors_by_category["validation"], 2);
    h.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_rejects_malformed_body() {
    let h = harness(60).await;
    let model = h.services.config.storage.model_dir.join("tiny.gguf");
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/system/cleanup")
        .header("authorization", format!("Bearer {ADMIN}"))
        .header("content-type", "application/json")
        .body(Body::from("{\"target\": \"everything\"}"))
        .unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(model.exists());

    // No body at all means a full cleanup.
    let response = h
        .app
        .clone()
        .oneshot(request("POST", "/api/v1/system/cleanup", Some(ADMIN), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["operation"], "full_cleanup");
    h.services.shutdown().await.unwrap();
}
