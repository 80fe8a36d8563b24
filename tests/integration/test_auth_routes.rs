//! Auth routes against a fake auth backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use axum_test::TestServer;
use jsonwebtoken::jwk::JwkSet;
use serde_json::{Value, json};

use workbench_api::config::AppConfig;
use workbench_api::routes::{AppState, create_api_router};
use workbench_api::services::jwt_service::JwtService;

/// Users by email (password, id) and live sessions.
#[derive(Clone, Default)]
struct Backend {
    users: Arc<Mutex<HashMap<String, (String, String)>>>,
    sessions: Arc<Mutex<HashMap<String, String>>>,
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn grant(backend: &Backend, id: &str, email: &str) -> Value {
    let token = format!("session-{}", backend.sessions.lock().unwrap().len() + 1);
    backend
        .sessions
        .lock()
        .unwrap()
        .insert(token.clone(), id.to_string());
    json!({ "user": { "id": id, "email": email }, "sessionToken": token })
}

async fn create_user(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let email = body["email"].as_str().unwrap_or_default().to_string();
    let mut users = backend.users.lock().unwrap();
    if users.contains_key(&email) {
        return reject(StatusCode::CONFLICT, "email already registered");
    }
    let id = format!("user-{}", users.len() + 1);
    let password = body["password"].as_str().unwrap_or_default().to_string();
    users.insert(email.clone(), (password, id.clone()));
    Json(json!({ "user": { "id": id, "email": email, "name": body["name"] } })).into_response()
}

async fn verify(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let email = body["email"].as_str().unwrap_or_default();
    let found = backend.users.lock().unwrap().get(email).cloned();
    match found {
        Some((password, id)) if body["password"] == password.as_str() => {
            Json(grant(&backend, &id, email)).into_response()
        }
        _ => reject(StatusCode::UNAUTHORIZED, "invalid email or password"),
    }
}

async fn token(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let session = body["sessionToken"].as_str().unwrap_or_default();
    if !backend.sessions.lock().unwrap().contains_key(session) {
        return reject(StatusCode::UNAUTHORIZED, "session expired");
    }
    Json(json!({ "token": format!("jwt-for-{}", session), "expiresAt": 1_900_000_000 })).into_response()
}

async fn revoke(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let session = body["sessionToken"].as_str().unwrap_or_default();
    match backend.sessions.lock().unwrap().remove(session) {
        Some(_) => Json(json!({ "ok": true })).into_response(),
        None => reject(StatusCode::UNAUTHORIZED, "unknown session"),
    }
}

async fn oauth_url(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "url": format!("https://{}.example/authorize", body["provider"].as_str().unwrap_or_default()),
        "state": "xyz"
    }))
}

async fn exchange(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    if body["code"] != "good-code" || body["state"] != "xyz" {
        return reject(StatusCode::BAD_REQUEST, "invalid code");
    }
    Json(grant(&backend, "oauth-user", "oauth@example.com")).into_response()
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/create-user-with-password", post(create_user))
        .route("/verify-credentials", post(verify))
        .route("/token", post(token))
        .route("/revoke-session", post(revoke))
        .route("/oauth-url", post(oauth_url))
        .route("/exchange-oauth-code", post(exchange))
        .with_state(Backend::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/auth", addr)
}

fn server(betterauth_url: String, per_minute: Option<&str>) -> TestServer {
    let per_minute = per_minute.map(str::to_string);
    let config = AppConfig::from_lookup(move |name| match name {
        "BETTERAUTH_URL" => Some(betterauth_url.clone()),
        "RATE_LIMIT_PER_MINUTE" => per_minute.clone(),
        _ => None,
    })
    .unwrap();
    let jwt = Arc::new(JwtService::from_key_set(&JwkSet { keys: Vec::new() }));
    let state = AppState::new(config, jwt, None).unwrap();
    let app = Router::new()
        .nest("/api/v1", create_api_router(&state))
        .with_state(state);
    TestServer::new(app).unwrap()
}

#[tokio::test]
async fn test_sign_up_then_sign_in_refresh_and_out() {
    let server = server(spawn_backend().await, None);

    let response = server
        .post("/api/v1/auth/sign-up")
        .json(&json!({ "email": " Ada@Example.com ", "password": "pw", "name": "Ada" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());
    let signed_up: Value = response.json();
    assert_eq!(signed_up["user"]["email"], "ada@example.com");
    assert_eq!(signed_up["access_token"], "jwt-for-session-1");
    assert_eq!(signed_up["expires_at"], 1_900_000_000);

    let response = server
        .post("/api/v1/auth/sign-up")
        .json(&json!({ "email": "ada@example.com", "password": "pw" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    let response = server
        .post("/api/v1/auth/sign-in")
        .json(&json!({ "email": "ada@example.com", "password": "wrong" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["message"], "invalid email or password");

    let signed_in: Value = server
        .post("/api/v1/auth/sign-in")
        .json(&json!({ "email": "ada@example.com", "password": "pw" }))
        .await
        .json();
    let session = signed_in["session_token"].as_str().unwrap().to_string();

    let refreshed: Value = server
        .post("/api/v1/auth/refresh")
        .json(&json!({ "session_token": session }))
        .await
        .json();
    assert_eq!(refreshed["access_token"], format!("jwt-for-{}", session));

    let response = server
        .post("/api/v1/auth/sign-out")
        .json(&json!({ "session_token": session }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
    let response = server
        .post("/api/v1/auth/refresh")
        .json(&json!({ "session_token": session }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_input_is_checked_before_calling_backend() {
    let server = server(spawn_backend().await, None);
    let response = server
        .post("/api/v1/auth/sign-up")
        .json(&json!({ "email": "not-an-email", "password": "pw" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let response = server
        .post("/api/v1/auth/sign-in")
        .json(&json!({ "email": "a@b.c", "password": "" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let response = server
        .post("/api/v1/auth/oauth-url")
        .json(&json!({ "provider": "github", "redirect_uri": "not a url" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oauth_handshake() {
    let server = server(spawn_backend().await, None);
    let started: Value = server
        .post("/api/v1/auth/oauth-url")
        .json(&json!({ "provider": "github", "redirect_uri": "http://localhost:3000/cb" }))
        .await
        .json();
    assert_eq!(started["url"], "https://github.example/authorize");
    assert_eq!(started["state"], "xyz");

    let response = server.get("/api/v1/auth/oauth/github/callback").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server
        .get("/api/v1/auth/oauth/github/callback")
        .add_query_param("code", "good-code")
        .add_query_param("state", "xyz")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());
    let body: Value = response.json();
    assert_eq!(body["user"]["id"], "oauth-user");
    assert!(body["access_token"].as_str().unwrap().starts_with("jwt-for-"));
}

#[tokio::test]
async fn test_backend_down_is_upstream_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let server = server(format!("http://{}/api/auth", addr), None);
    let response = server
        .post("/api/v1/auth/sign-in")
        .json(&json!({ "email": "a@b.c", "password": "pw" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["code"], "UPSTREAM_UNAVAILABLE");
}

#[tokio::test]
async fn test_auth_routes_are_rate_limited() {
    let server = server(spawn_backend().await, Some("2"));
    for _ in 0..2 {
        let response = server
            .post("/api/v1/auth/sign-in")
            .json(&json!({ "email": "nobody@example.com", "password": "pw" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }
    let response = server
        .post("/api/v1/auth/sign-in")
        .json(&json!({ "email": "nobody@example.com", "password": "pw" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.json::<Value>()["code"], "RATE_LIMITED");

    // Health is not throttled.
    let response = server.get("/api/v1/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
}
