//! HTTP surface exercised through the router without binding a socket.

mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::upload_client;
use marketplace_core::{
    routes::routes::routes,
    services::upload_service::GrantPolicy,
    state::{AppState, GrantDefaults},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn storage(head_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/marketplace"))
        .respond_with(ResponseTemplate::new(head_status))
        .mount(&server)
        .await;
    server
}

fn app(server: &MockServer) -> Router {
    let defaults = GrantDefaults {
        bucket: "marketplace".into(),
        expires_in_seconds: 900,
        key_prefix: "uploads/".into(),
    };
    let policy = GrantPolicy::new(3600).with_reserved_prefixes(["_system/"]);
    routes().with_state(AppState::new(upload_client(&server.uri(), policy), defaults))
}

async fn post_grant(app: Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/uploads/grant")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn grant_with_explicit_key() {
    let server = storage(200).await;
    let (status, body) = post_grant(
        app(&server),
        json!({
            "key": "test-file.txt",
            "contentType": "text/plain",
            "expiresInSeconds": 3600
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bucket"], "marketplace");
    assert_eq!(body["key"], "test-file.txt");
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["expiresInSeconds"], 3600);
    assert!(
        body["url"]
            .as_str()
            .unwrap()
            .contains("/marketplace/test-file.txt?")
    );
}

#[tokio::test]
async fn grant_derives_key_and_applies_defaults() {
    let server = storage(200).await;
    let (status, body) = post_grant(
        app(&server),
        json!({ "filename": "excavator manual.pdf", "contentType": "application/pdf" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with("uploads/"));
    assert!(key.ends_with("-excavator_manual.pdf"));
    assert_eq!(body["expiresInSeconds"], 900);
}

#[tokio::test]
async fn missing_key_and_filename_is_bad_request() {
    let server = storage(200).await;
    let (status, body) = post_grant(app(&server), json!({ "contentType": "text/plain" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn validation_errors_are_bad_requests() {
    let server = storage(200).await;
    for payload in [
        json!({ "key": "", "contentType": "text/plain" }),
        json!({ "key": "_system/x", "contentType": "text/plain" }),
        json!({ "key": "a.txt", "contentType": "text/plain", "expiresInSeconds": 3601 }),
        json!({ "key": "a.txt", "contentType": "not a mime" }),
        json!({ "bucket": "Bad_Bucket", "key": "a.txt", "contentType": "text/plain" }),
    ] {
        let (status, _) = post_grant(app(&server), payload.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", payload);
    }
}

#[tokio::test]
async fn storage_failure_is_bad_gateway_with_retry_hint() {
    let server = storage(503).await;
    let (status, body) = post_grant(
        app(&server),
        json!({ "key": "a.txt", "contentType": "text/plain" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["retryable"], true);
    assert_eq!(body["error"], "could not authorize upload");

    let server = storage(403).await;
    let (status, body) = post_grant(
        app(&server),
        json!({ "key": "a.txt", "contentType": "text/plain" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn health_and_readiness() {
    let server = storage(200).await;
    let response = app(&server)
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(&server)
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let down = storage(403).await;
    let response = app(&down)
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["checks"]["storage"]["ok"], false);
}
