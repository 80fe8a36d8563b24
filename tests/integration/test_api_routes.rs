//! End-to-end tests of the /api/v1 surface through an in-process server.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum_test::TestServer;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};

use common::spawn_upstream;
use workbench_api::config::AppConfig;
use workbench_api::ids::Id;
use workbench_api::routes::{AppState, create_api_router};
use workbench_api::services::auth_adapter::AuthAdapter;
use workbench_api::services::event_sync::{ChangeKind, EventKind, SyncStreamer, SyncTopic};
use workbench_api::services::jwt_service::{Claims, JwtService};

const SECRET: &[u8] = b"route-tests-signing-key-0123456789";
const ADAPTER_SECRET: &str = "adapter-shared-secret";

fn key_set() -> JwkSet {
    serde_json::from_value(json!({
        "keys": [{ "kty": "oct", "kid": "k1", "k": URL_SAFE_NO_PAD.encode(SECRET) }]
    }))
    .unwrap()
}

fn token_for(user: Id) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".to_string());
    let claims = Claims {
        sub: user.to_string(),
        email: Some("dev@example.com".to_string()),
        name: Some("Dev".to_string()),
        exp: chrono::Utc::now().timestamp() + 600,
        iat: Some(chrono::Utc::now().timestamp()),
    };
    encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

fn server_and_state(config: AppConfig, adapter: Option<Arc<AuthAdapter>>) -> (TestServer, AppState) {
    let jwt = Arc::new(JwtService::from_key_set(&key_set()));
    let state = AppState::new(config, jwt, adapter).unwrap();
    let app = Router::new()
        .nest("/api/v1", create_api_router(&state))
        .with_state(state.clone());
    (TestServer::new(app).unwrap(), state)
}

fn server_with(config: AppConfig, adapter: Option<Arc<AuthAdapter>>) -> TestServer {
    server_and_state(config, adapter).0
}

fn server() -> TestServer {
    server_with(AppConfig::default(), None)
}

/// A caller with a fresh workspace.
struct Session {
    token: String,
    workspace: String,
}

async fn session(server: &TestServer) -> Session {
    let token = token_for(Id::new());
    let response = server
        .post("/api/v1/workspaces")
        .authorization_bearer(&token)
        .json(&json!({ "name": "routes" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let workspace: Value = response.json();
    Session {
        token,
        workspace: workspace["id"].as_str().unwrap().to_string(),
    }
}

async fn create_http(server: &TestServer, s: &Session, name: &str, method: &str, url: &str) -> String {
    let response = server
        .post(&format!("/api/v1/workspaces/{}/http", s.workspace))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": name, "method": method, "url": url }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED, "{}", response.text());
    response.json::<Value>()["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_and_openapi_are_public() {
    let server = server();
    let health: Value = server.get("/api/v1/health").await.json();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["service"], "workbench-api");

    let doc = server.get("/api/v1/openapi.json").await;
    assert_eq!(doc.status_code(), StatusCode::OK);
    assert!(doc.json::<Value>()["paths"].is_object());
}

#[tokio::test]
async fn test_protected_routes_require_a_valid_token() {
    let server = server();
    let response = server.get("/api/v1/workspaces").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["code"], "UNAUTHENTICATED");

    let response = server
        .get("/api/v1/workspaces")
        .authorization_bearer("not-a-jwt")
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    // The query parameter works where headers cannot be set.
    let token = token_for(Id::new());
    let response = server
        .get("/api/v1/workspaces")
        .add_query_param("access_token", &token)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!([]));
}

#[tokio::test]
async fn test_workspace_membership_gates_access() {
    let server = server();
    let owner = session(&server).await;
    let listed: Value = server
        .get("/api/v1/workspaces")
        .authorization_bearer(&owner.token)
        .await
        .json();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let outsider_id = Id::new();
    let outsider = token_for(outsider_id);
    let path = format!("/api/v1/workspaces/{}", owner.workspace);
    let response = server.get(&path).authorization_bearer(&outsider).await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["code"], "PERMISSION_DENIED");

    let response = server
        .post(&format!("{}/members", path))
        .authorization_bearer(&owner.token)
        .json(&json!({ "user_id": outsider_id.to_string(), "role": "member" }))
        .await;
    assert!(response.status_code().is_success(), "{}", response.text());
    let response = server.get(&path).authorization_bearer(&outsider).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = server
        .get(&format!("/api/v1/workspaces/{}", Id::new()))
        .authorization_bearer(&owner.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = server
        .get("/api/v1/workspaces/not-an-id")
        .authorization_bearer(&owner.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_editing_and_run_against_upstream() {
    let (base, _) = spawn_upstream().await;
    let server = server();
    let s = session(&server).await;
    let http = create_http(&server, &s, "echo", "POST", "{{host}}/echo").await;

    let env: Value = server
        .post(&format!("/api/v1/workspaces/{}/environments", s.workspace))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "local" }))
        .await
        .json();
    let env_id = env["id"].as_str().unwrap();
    let response = server
        .post(&format!("/api/v1/environments/{}/variables", env_id))
        .authorization_bearer(&s.token)
        .json(&json!({ "key": "host", "value": base }))
        .await;
    assert!(response.status_code().is_success(), "{}", response.text());

    let response = server
        .post(&format!("/api/v1/http/{}/headers", http))
        .authorization_bearer(&s.token)
        .json(&json!({ "key": "X-Trace", "value": "route-test" }))
        .await;
    assert!(response.status_code().is_success(), "{}", response.text());
    let response = server
        .post(&format!("/api/v1/http/{}/asserts", http))
        .authorization_bearer(&s.token)
        .json(&json!({ "expression": "response.status == 200" }))
        .await;
    assert!(response.status_code().is_success(), "{}", response.text());

    let response = server
        .post(&format!("/api/v1/http/{}/cookies", http))
        .authorization_bearer(&s.token)
        .json(&json!({ "key": "a", "value": "b" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let execution: Value = server
        .post(&format!("/api/v1/http/{}/run", http))
        .authorization_bearer(&s.token)
        .add_query_param("environment_id", env_id)
        .await
        .json();
    assert_eq!(execution["response"]["status"], 200);
    let echoed: Value = serde_json::from_str(execution["response"]["body"].as_str().unwrap()).unwrap();
    assert_eq!(echoed["headers"]["x-trace"], "route-test");
    assert_eq!(execution["assertions"][0]["success"], true);

    let history: Value = server
        .get(&format!("/api/v1/http/{}/history", http))
        .authorization_bearer(&s.token)
        .await
        .json();
    assert_eq!(history["versions"].as_array().unwrap().len(), 1);
    assert_eq!(history["responses"].as_array().unwrap().len(), 1);

    // Without an environment the template cannot expand.
    let response = server
        .post(&format!("/api/v1/http/{}/run", http))
        .authorization_bearer(&s.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "INVALID_ARGUMENT");

    let response = server
        .delete(&format!("/api/v1/http/{}", http))
        .authorization_bearer(&s.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
    let response = server
        .get(&format!("/api/v1/http/{}", http))
        .authorization_bearer(&s.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delta_overrides_through_routes() {
    let server = server();
    let s = session(&server).await;
    let http = create_http(&server, &s, "users", "GET", "https://api.test/users").await;
    let header: Value = server
        .post(&format!("/api/v1/http/{}/headers", http))
        .authorization_bearer(&s.token)
        .json(&json!({ "key": "X-Role", "value": "viewer" }))
        .await
        .json();

    let response = server
        .post(&format!("/api/v1/http/{}/deltas", http))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "as admin" }))
        .await;
    assert!(response.status_code().is_success(), "{}", response.text());
    let delta: Value = response.json();
    assert_eq!(delta["is_delta"], true);
    let delta_id = delta["id"].as_str().unwrap();

    let response = server
        .patch(&format!("/api/v1/deltas/{}", delta_id))
        .authorization_bearer(&s.token)
        .json(&json!({ "url": "https://api.test/admin/users" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());
    let response = server
        .put(&format!(
            "/api/v1/deltas/{}/overrides/headers/{}",
            delta_id,
            header["id"].as_str().unwrap()
        ))
        .authorization_bearer(&s.token)
        .json(&json!({ "value": "admin" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());

    let resolved: Value = server
        .get(&format!("/api/v1/http/{}/resolved", delta_id))
        .authorization_bearer(&s.token)
        .await
        .json();
    assert_eq!(resolved["http"]["url"], "https://api.test/admin/users");
    assert_eq!(resolved["headers"][0]["value"], "admin");

    // The base stays untouched.
    let base: Value = server
        .get(&format!("/api/v1/http/{}/resolved", http))
        .authorization_bearer(&s.token)
        .await
        .json();
    assert_eq!(base["headers"][0]["value"], "viewer");

    let response = server
        .patch(&format!("/api/v1/deltas/{}", http))
        .authorization_bearer(&s.token)
        .json(&json!({ "url": "https://elsewhere.test" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);

    let listed: Value = server
        .get(&format!("/api/v1/http/{}/deltas", http))
        .authorization_bearer(&s.token)
        .await
        .json();
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_flow_run_streams_status_events() {
    let (base, _) = spawn_upstream().await;
    let server = server();
    let s = session(&server).await;
    let http = create_http(&server, &s, "echo", "GET", &format!("{}/echo", base)).await;

    let graph: Value = server
        .post(&format!("/api/v1/workspaces/{}/flows", s.workspace))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "smoke" }))
        .await
        .json();
    let flow_id = graph["flow"]["id"].as_str().unwrap().to_string();
    let start_id = graph["nodes"][0]["id"].as_str().unwrap().to_string();

    let response = server
        .post(&format!("/api/v1/flows/{}/nodes", flow_id))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "call", "kind": "request", "http_id": http }))
        .await;
    assert!(response.status_code().is_success(), "{}", response.text());
    let call: Value = response.json();
    let response = server
        .post(&format!("/api/v1/flows/{}/edges", flow_id))
        .authorization_bearer(&s.token)
        .json(&json!({ "source_id": start_id, "target_id": call["id"] }))
        .await;
    assert!(response.status_code().is_success(), "{}", response.text());

    let response = server
        .post(&format!("/api/v1/flows/{}/run", flow_id))
        .authorization_bearer(&s.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.text();
    assert!(body.contains("event: node"), "{}", body);
    assert!(body.contains("event: flow"), "{}", body);
    assert!(body.contains("event: summary"), "{}", body);
    assert!(body.contains(r#""status":"succeeded""#), "{}", body);

    let executions: Value = server
        .get(&format!("/api/v1/flows/{}/executions", flow_id))
        .authorization_bearer(&s.token)
        .await
        .json();
    assert!(!executions.as_array().unwrap().is_empty());

    let fetched: Value = server
        .get(&format!("/api/v1/flows/{}", flow_id))
        .authorization_bearer(&s.token)
        .await
        .json();
    assert_eq!(fetched["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(fetched["edges"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_node_events_publish_parents_before_children() {
    let (server, state) = server_and_state(AppConfig::default(), None);
    let s = session(&server).await;
    let graph: Value = server
        .post(&format!("/api/v1/workspaces/{}/flows", s.workspace))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "nested" }))
        .await
        .json();
    let flow_id = graph["flow"]["id"].as_str().unwrap().to_string();
    let start_id = graph["nodes"][0]["id"].as_str().unwrap().to_string();

    // The child row exists before its loop.
    let add_node = |body: Value| {
        server
            .post(&format!("/api/v1/flows/{}/nodes", flow_id))
            .authorization_bearer(&s.token)
            .json(&body)
    };
    let child: Value = add_node(json!({ "name": "child", "kind": "no-op" })).await.json();
    let parent: Value = add_node(json!({ "name": "repeat", "kind": "for", "iterations": "2" }))
        .await
        .json();
    for (source, target, handle) in [
        (start_id.as_str(), &parent["id"], "default"),
        (parent["id"].as_str().unwrap(), &child["id"], "loop-body"),
    ] {
        let response = server
            .post(&format!("/api/v1/flows/{}/edges", flow_id))
            .authorization_bearer(&s.token)
            .json(&json!({ "source_id": source, "target_id": target, "handle": handle }))
            .await;
        assert!(response.status_code().is_success(), "{}", response.text());
    }

    let workspace_id: Id = s.workspace.parse().unwrap();
    let mut events = state
        .events
        .subscribe(Arc::new(move |t: &SyncTopic| {
            t.workspace_id == workspace_id && t.kind == EventKind::Node
        }))
        .await;
    let response = server
        .post(&format!("/api/v1/flows/{}/layout", flow_id))
        .authorization_bearer(&s.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let mut order = Vec::new();
    while let Some((_, event)) = events.try_recv() {
        order.push(event.id.to_string());
    }
    let parent_at = order.iter().position(|id| parent["id"] == id.as_str()).unwrap();
    let child_at = order.iter().position(|id| child["id"] == id.as_str()).unwrap();
    assert!(parent_at < child_at, "{:?}", order);
}

#[tokio::test]
async fn test_deleting_request_publishes_the_whole_cascade() {
    let (server, state) = server_and_state(AppConfig::default(), None);
    let s = session(&server).await;
    let http = create_http(&server, &s, "doomed", "GET", "https://a.test/x").await;
    let header: Value = server
        .post(&format!("/api/v1/http/{}/headers", http))
        .authorization_bearer(&s.token)
        .json(&json!({ "key": "X-Trace", "value": "1" }))
        .await
        .json();
    let graph: Value = server
        .post(&format!("/api/v1/workspaces/{}/flows", s.workspace))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "uses it" }))
        .await
        .json();
    let node: Value = server
        .post(&format!("/api/v1/flows/{}/nodes", graph["flow"]["id"].as_str().unwrap()))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "call", "kind": "request", "http_id": http }))
        .await
        .json();

    let workspace_id: Id = s.workspace.parse().unwrap();
    let mut events = state
        .events
        .subscribe(Arc::new(move |t: &SyncTopic| t.workspace_id == workspace_id))
        .await;
    let response = server
        .delete(&format!("/api/v1/http/{}", http))
        .authorization_bearer(&s.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    let mut seen = Vec::new();
    while let Some((_, event)) = events.try_recv() {
        seen.push(event);
    }
    let deleted = |kind: EventKind, id: &Value| {
        seen.iter()
            .any(|e| e.kind == kind && e.change == ChangeKind::Delete && *id == e.id.to_string().as_str())
    };
    assert!(deleted(EventKind::Http, &json!(http)), "{:?}", seen);
    assert!(deleted(EventKind::HttpHeader, &header["id"]), "{:?}", seen);
    assert!(seen.iter().any(|e| e.kind == EventKind::Folder && e.change == ChangeKind::Delete));
    let detached = seen
        .iter()
        .find(|e| e.kind == EventKind::Node && node["id"] == e.id.to_string().as_str())
        .unwrap();
    assert_eq!(detached.change, ChangeKind::Update);
    assert!(detached.data.get("http_id").is_none());
}

#[tokio::test]
async fn test_request_node_must_stay_in_workspace() {
    let server = server();
    let s = session(&server).await;
    let other = session(&server).await;
    let foreign = create_http(&server, &other, "elsewhere", "GET", "https://x.test").await;
    let graph: Value = server
        .post(&format!("/api/v1/workspaces/{}/flows", s.workspace))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "f" }))
        .await
        .json();
    let response = server
        .post(&format!("/api/v1/flows/{}/nodes", graph["flow"]["id"].as_str().unwrap()))
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "call", "kind": "request", "http_id": foreign }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_har_import_asks_for_domains_then_imports() {
    let server = server();
    let s = session(&server).await;
    let har = json!({"log": {"version": "1.2", "entries": [{
        "_resourceType": "xhr",
        "request": {"method": "GET", "url": "https://api.example.com/items", "headers": []},
        "response": {"status": 200, "content": {"text": "[]"}}
    }]}});
    let path = format!("/api/v1/workspaces/{}/import/har", s.workspace);

    let response = server
        .post(&path)
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "capture", "har": har }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let error: Value = response.json();
    assert_eq!(error["code"], "MISSING_DATA");
    assert_eq!(error["details"]["missing"], json!(["api.example.com"]));

    let response = server
        .post(&path)
        .authorization_bearer(&s.token)
        .json(&json!({
            "name": "capture",
            "har": har.to_string(),
            "domains": [{ "domain": "api.example.com", "variable": "API", "enabled": true }]
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED, "{}", response.text());
    let result: Value = response.json();
    assert_eq!(result["bases"][0]["url"], "{{API}}/items");

    let response = server
        .post(&path)
        .authorization_bearer(&s.token)
        .json(&json!({ "name": "capture", "har": "{not json" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_har_import_checks_membership_before_the_document() {
    let server = server();
    let s = session(&server).await;
    let outsider = token_for(Id::new());
    let response = server
        .post(&format!("/api/v1/workspaces/{}/import/har", s.workspace))
        .authorization_bearer(&outsider)
        .json(&json!({ "name": "capture", "har": "not a har document" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["code"], "PERMISSION_DENIED");
}

#[tokio::test]
async fn test_bundle_export_and_import() {
    let server = server();
    let s = session(&server).await;
    create_http(&server, &s, "ping", "GET", "https://api.test/ping").await;

    let response = server
        .get(&format!("/api/v1/workspaces/{}/export", s.workspace))
        .authorization_bearer(&s.token)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let yaml = response.text();
    assert!(yaml.contains("name: ping"), "{}", yaml);

    let response = server
        .post("/api/v1/workspaces/import")
        .authorization_bearer(&s.token)
        .content_type("application/yaml")
        .bytes(yaml.clone().into())
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED, "{}", response.text());
    let imported: Value = response.json();
    assert_ne!(imported["id"].as_str().unwrap(), s.workspace);

    let listed: Value = server
        .get("/api/v1/workspaces")
        .authorization_bearer(&s.token)
        .await
        .json();
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let response = server
        .post("/api/v1/workspaces/import")
        .authorization_bearer(&s.token)
        .content_type("application/json")
        .bytes(yaml.into())
        .await;
    assert_eq!(response.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_auth_adapter_requires_secret() {
    let unconfigured = server();
    let response = unconfigured
        .post("/api/v1/auth-adapter")
        .json(&json!({ "model": "user", "action": "count" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let config = AppConfig::from_lookup(|name| {
        (name == "AUTH_ADAPTER_SECRET").then(|| ADAPTER_SECRET.to_string())
    })
    .unwrap();
    let adapter = Arc::new(AuthAdapter::open(None).unwrap());
    let server = server_with(config, Some(adapter));

    let request = json!({
        "model": "user",
        "action": "create",
        "data": { "name": "Ada", "email": "ada@example.com", "emailVerified": false }
    });
    let response = server.post("/api/v1/auth-adapter").json(&request).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let response = server
        .post("/api/v1/auth-adapter")
        .add_header("x-adapter-secret", "wrong")
        .json(&request)
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = server
        .post("/api/v1/auth-adapter")
        .add_header("x-adapter-secret", ADAPTER_SECRET)
        .json(&request)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());
    let user: Value = response.json();
    assert_eq!(user["email"], "ada@example.com");

    let found: Value = server
        .post("/api/v1/auth-adapter")
        .add_header("x-adapter-secret", ADAPTER_SECRET)
        .json(&json!({
            "model": "user",
            "action": "findOne",
            "where": [{ "field": "email", "value": "ada@example.com" }]
        }))
        .await
        .json();
    assert_eq!(found["id"], user["id"]);

    // Duplicate emails violate the unique constraint.
    let response = server
        .post("/api/v1/auth-adapter")
        .add_header("x-adapter-secret", ADAPTER_SECRET)
        .json(&request)
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}
