//! Backend client: request signing, on-401 refresh and session transitions.

use marketplace_core::{
    models::session::{AccessToken, SessionPhase, User},
    services::{
        backend_client::{BackendClient, BackendError},
        session_manager::SessionManager,
    },
};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, session: &SessionManager) -> BackendClient {
    BackendClient::builder()
        .base_url(format!("{}/", server.uri()))
        .session(session.clone())
        .build()
        .unwrap()
}

fn signed_in(session: &SessionManager, token: &str) {
    session.set_auth(User::new("7").with_role("buyer"), AccessToken::new(token));
}

#[tokio::test]
async fn builder_requires_base_url() {
    let result = BackendClient::builder().build();
    assert!(matches!(result, Err(BackendError::Configuration(_))));
}

#[tokio::test]
async fn login_establishes_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({ "email": "buyer@example.com", "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": { "id": "7", "role": "buyer", "firstName": "Ada" },
            "accessToken": "t1"
        })))
        .mount(&server)
        .await;

    let session = SessionManager::new();
    let user = client(&server, &session)
        .login(&json!({ "email": "buyer@example.com", "password": "pw" }))
        .await
        .unwrap();

    assert_eq!(user.profile["firstName"], "Ada");
    let snapshot = session.snapshot();
    assert!(snapshot.is_authenticated);
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.access_token.unwrap().as_str(), "t1");
}

#[tokio::test]
async fn failed_login_leaves_session_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let session = SessionManager::new();
    let result = client(&server, &session)
        .login(&json!({ "email": "x", "password": "y" }))
        .await;
    assert!(matches!(result, Err(BackendError::Unauthorized)));
    assert_eq!(session.phase(), SessionPhase::Resolving);
}

#[tokio::test]
async fn requests_carry_the_current_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cabinet/favorites"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new();
    signed_in(&session, "t1");
    let favorites: Value = client(&server, &session)
        .get_json("/cabinet/favorites")
        .await
        .unwrap();
    assert_eq!(favorites[0]["id"], 1);
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cabinet/messages"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "new" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cabinet/messages"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unread": 3 })))
        .expect(1)
        .mount(&server)
        .await;

    let session = SessionManager::new();
    signed_in(&session, "old");
    let body: Value = client(&server, &session)
        .get_json("/cabinet/messages")
        .await
        .unwrap();

    assert_eq!(body["unread"], 3);
    let snapshot = session.snapshot();
    assert!(snapshot.is_authenticated);
    assert_eq!(snapshot.user.unwrap().id, "7");
    assert_eq!(snapshot.access_token.unwrap().as_str(), "new");
}

#[tokio::test]
async fn rejected_refresh_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cabinet/tickets"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let session = SessionManager::new();
    signed_in(&session, "old");
    let result: Result<Value, _> = client(&server, &session).get_json("/cabinet/tickets").await;

    assert!(matches!(result, Err(BackendError::Unauthorized)));
    assert_eq!(session.phase(), SessionPhase::Unauthenticated);
    assert!(session.snapshot().is_cleared());
}

#[tokio::test]
async fn late_refresh_rejection_keeps_newer_login() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cabinet/tickets"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let session = SessionManager::new();
    signed_in(&session, "old");
    let backend = client(&server, &session);
    let request =
        tokio::spawn(async move { backend.get_json::<Value>("/cabinet/tickets").await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.logout();
    session.set_auth(User::new("8").with_role("seller"), AccessToken::new("fresh"));

    let result = request.await.unwrap();
    assert!(matches!(result, Err(BackendError::Unauthorized)));
    let snapshot = session.snapshot();
    assert!(snapshot.is_authenticated);
    assert_eq!(snapshot.user.unwrap().id, "8");
    assert_eq!(snapshot.access_token.unwrap().as_str(), "fresh");
}

#[tokio::test]
async fn unauthorized_before_sign_in_keeps_resolving() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/listings/private"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(0)
        .mount(&server)
        .await;

    let session = SessionManager::new();
    let result: Result<Value, _> = client(&server, &session).get_json("/listings/private").await;

    assert!(matches!(result, Err(BackendError::Unauthorized)));
    assert_eq!(session.phase(), SessionPhase::Resolving);
    assert!(session.snapshot().is_loading);
}

#[tokio::test]
async fn refresh_server_error_keeps_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cabinet/tickets"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let session = SessionManager::new();
    signed_in(&session, "old");
    let result: Result<Value, _> = client(&server, &session).get_json("/cabinet/tickets").await;

    assert!(matches!(
        result,
        Err(BackendError::Status { status: 502, .. })
    ));
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn bootstrap_restores_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "boot" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer boot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "9", "role": "admin" })))
        .mount(&server)
        .await;

    let session = SessionManager::new();
    let phase = client(&server, &session).bootstrap().await.unwrap();

    assert_eq!(phase, SessionPhase::Authenticated);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.user.unwrap().role.as_deref(), Some("admin"));
    assert!(!snapshot.is_loading);
}

#[tokio::test]
async fn bootstrap_without_session_resolves_to_signed_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let session = SessionManager::new();
    assert_eq!(session.phase(), SessionPhase::Resolving);
    let phase = client(&server, &session).bootstrap().await.unwrap();

    assert_eq!(phase, SessionPhase::Unauthenticated);
    assert_eq!(session.phase(), SessionPhase::Unauthenticated);
}

#[tokio::test]
async fn logout_clears_locally_even_if_backend_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let session = SessionManager::new();
    signed_in(&session, "t1");
    let backend = client(&server, &session);
    backend.logout().await;
    assert!(session.snapshot().is_cleared());

    backend.logout().await;
    assert!(session.snapshot().is_cleared());
}
