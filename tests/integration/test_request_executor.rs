//! Integration tests for request execution against a local upstream

mod common;

use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use common::{add_http, closed_port_url, seeded_store, spawn_upstream};
use workbench_api::models::{BodyKind, HttpAssert, HttpBodyRaw, HttpKeyValue, KeyValueKind};
use workbench_api::ids::Id;
use workbench_api::services::delta_resolver::{ChildPatch, create_delta_http, override_key_value};
use workbench_api::services::request_executor::{ExecutorError, RequestExecutor};
use workbench_api::services::template::TemplateError;

fn scope(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn executor(store: &workbench_api::storage::Store) -> RequestExecutor {
    RequestExecutor::new(store.clone(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_execute_expands_sends_and_records() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "echo", "post", &format!("{}/echo", "{{host}}")).await;
    {
        let mut tx = store.begin().await.unwrap();
        let mut h = tx.get_http(http.id).unwrap();
        h.body_kind = BodyKind::Raw;
        tx.update_http(h).unwrap();
        tx.create_key_value(HttpKeyValue::new(Id::new(), http.id, KeyValueKind::Header, "Authorization", "Bearer {{token}}"))
            .unwrap();
        tx.create_key_value(HttpKeyValue::new(Id::new(), http.id, KeyValueKind::SearchParam, "q", "{{term}}"))
            .unwrap();
        tx.create_body_raw(HttpBodyRaw::new(Id::new(), http.id, r#"{"user": "{{user}}"}"#))
            .unwrap();
        tx.create_assert(HttpAssert::new(Id::new(), http.id, "response.status == 200"))
            .unwrap();
        tx.create_assert(HttpAssert::new(Id::new(), http.id, "response.body.json.user == 'nobody'"))
            .unwrap();
        tx.commit();
    }

    let vars = scope(&[
        ("host", json!(base)),
        ("token", json!("abc")),
        ("term", json!("rust lang")),
        ("user", json!("ada")),
    ]);
    let execution = executor(&store)
        .execute(http.id, &vars, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.response.status, 200);
    let echoed: Value = serde_json::from_str(&execution.response.body).unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["headers"]["authorization"], "Bearer abc");
    assert_eq!(echoed["headers"]["content-type"], "application/json");
    assert_eq!(echoed["query"], "q=rust+lang");
    assert_eq!(echoed["json"]["user"], "ada");

    assert_eq!(execution.assertions.len(), 2);
    assert!(execution.assertions[0].success);
    assert!(!execution.assertions[1].success);
    assert!(!execution.all_assertions_passed());
    assert_eq!(execution.output()["request"]["method"], "POST");
    assert_eq!(execution.output()["response"]["body"]["json"]["user"], "ada");

    let reader = store.reader().await.unwrap();
    let responses = reader.list_responses(http.id);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].snapshot_id, execution.snapshot.http.id);
    assert!(!reader.list_response_headers(responses[0].id).is_empty());
    assert_eq!(reader.list_response_asserts(responses[0].id).len(), 2);
    assert_eq!(reader.list_versions(http.id).len(), 1);
    // The snapshot keeps the templates, not the expanded values.
    let frozen = reader.list_key_values(execution.snapshot.http.id, KeyValueKind::Header);
    assert_eq!(frozen[0].value, "Bearer {{token}}");
}

#[tokio::test]
async fn test_delta_execution_uses_resolved_view() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "echo", "GET", &format!("{}/echo", base)).await;
    let header = HttpKeyValue::new(Id::new(), http.id, KeyValueKind::Header, "X-Env", "prod");
    let delta = {
        let mut tx = store.begin().await.unwrap();
        tx.create_key_value(header.clone()).unwrap();
        let delta = create_delta_http(&mut tx, http.id, None).unwrap();
        override_key_value(
            &mut tx,
            delta.id,
            header.id,
            &ChildPatch {
                value: Some("staging".into()),
                ..Default::default()
            },
        )
        .unwrap();
        tx.commit();
        delta
    };

    let execution = executor(&store)
        .execute(delta.id, &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap();
    let echoed: Value = serde_json::from_str(&execution.response.body).unwrap();
    assert_eq!(echoed["headers"]["x-env"], "staging");
    assert_eq!(execution.snapshot.version.http_id, delta.id);

    let reader = store.reader().await.unwrap();
    assert_eq!(reader.list_responses(delta.id).len(), 1);
    assert!(reader.list_responses(http.id).is_empty());
}

#[tokio::test]
async fn test_url_encoded_and_disabled_rows() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "form", "POST", &format!("{}/echo", base)).await;
    {
        let mut tx = store.begin().await.unwrap();
        let mut h = tx.get_http(http.id).unwrap();
        h.body_kind = BodyKind::UrlEncoded;
        tx.update_http(h).unwrap();
        tx.create_key_value(HttpKeyValue::new(Id::new(), http.id, KeyValueKind::BodyUrlEncoded, "a", "1"))
            .unwrap();
        let mut off = HttpKeyValue::new(Id::new(), http.id, KeyValueKind::BodyUrlEncoded, "b", "2");
        off.enabled = false;
        off.display_order = 1.0;
        tx.create_key_value(off).unwrap();
        tx.commit();
    }

    let execution = executor(&store)
        .execute(http.id, &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap();
    let echoed: Value = serde_json::from_str(&execution.response.body).unwrap();
    assert_eq!(echoed["body"], "a=1");
    assert_eq!(echoed["headers"]["content-type"], "application/x-www-form-urlencoded");
}

#[tokio::test]
async fn test_non_success_status_is_recorded_not_failed() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "teapot", "GET", &format!("{}/status/418", base)).await;
    let execution = executor(&store)
        .execute(http.id, &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.response.status, 418);
    assert!(execution.all_assertions_passed());
}

#[tokio::test]
async fn test_binary_body_is_base64() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "bin", "GET", &format!("{}/binary", base)).await;
    let execution = executor(&store)
        .execute(http.id, &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(execution.response.body_base64);
    assert_eq!(execution.response.body, "//4AAQ==");
    assert_eq!(execution.response.size, 4);
}

#[tokio::test]
async fn test_missing_variable_fails_before_sending() {
    let (base, upstream) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "count", "GET", &format!("{}/counter?k={{{{missing}}}}", base)).await;
    let err = executor(&store)
        .execute(http.id, &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Template(TemplateError::Missing(ref v)) if v == "missing"));
    assert_eq!(upstream.hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    let reader = store.reader().await.unwrap();
    assert!(reader.list_versions(http.id).is_empty());
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let (store, _) = seeded_store().await;
    let err = executor(&store)
        .execute(Id::new(), &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Resolve(_)));
}

#[tokio::test]
async fn test_timeout() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "slow", "GET", &format!("{}/slow", base)).await;
    let executor = RequestExecutor::new(store.clone(), Duration::from_millis(200)).unwrap();
    let err = executor
        .execute(http.id, &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Timeout), "{}", err);
    let reader = store.reader().await.unwrap();
    assert!(reader.list_responses(http.id).is_empty());
}

#[tokio::test]
async fn test_cancel_stops_in_flight_request() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "slow", "GET", &format!("{}/slow", base)).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let err = executor(&store)
        .execute(http.id, &Map::new(), None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Canceled));
    // No version is left behind without a response.
    let reader = store.reader().await.unwrap();
    assert!(reader.list_versions(http.id).is_empty());
}

#[tokio::test]
async fn test_unreachable_upstream() {
    let base = closed_port_url().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "down", "GET", &format!("{}/echo", base)).await;
    let err = executor(&store)
        .execute(http.id, &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Upstream(_)), "{}", err);
    let reader = store.reader().await.unwrap();
    assert!(reader.list_versions(http.id).is_empty());
}

#[tokio::test]
async fn test_bad_url_is_invalid_request() {
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "bad", "GET", "not a url").await;
    let err = executor(&store)
        .execute(http.id, &Map::new(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::InvalidRequest(_)));
}
