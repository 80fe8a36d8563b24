//! Executes HTTP requests: resolve, snapshot, expand, send, assert, record.
//!
//! The store is never locked across the outbound call. Resolution and the snapshot
//! happen in one transaction, the response is recorded in a fresh one afterwards.

use super::delta_resolver::{self, ResolveError, ResolvedHttp, SnapshotRows};
use super::expression::{self, Scope, truthy};
use super::template::{self, TemplateError};
use crate::ids::Id;
use crate::models::{
    BodyKind, HttpResponse, HttpResponseAssert, HttpResponseHeader, KeyValueKind,
};
use crate::storage::{StorageError, Store};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    #[error("request timed out")]
    Timeout,
    #[error("request canceled")]
    Canceled,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for ExecutorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExecutorError::Timeout
        } else if e.is_builder() {
            ExecutorError::InvalidRequest(e.to_string())
        } else {
            ExecutorError::Upstream(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
enum PreparedBody {
    None,
    Raw(String),
    Form(Vec<(String, String)>),
    UrlEncoded(Vec<(String, String)>),
}

/// A request with every template expanded.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    body: PreparedBody,
}

impl PreparedRequest {
    pub fn summary(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        json!({ "method": self.method, "url": self.url, "headers": headers })
    }
}

/// What came back over the wire.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub body_base64: bool,
    pub duration_ms: u64,
    pub size: u64,
}

impl CapturedResponse {
    /// `{status, headers, body, duration}` with JSON bodies parsed.
    pub fn as_value(&self) -> Value {
        let mut headers = Map::new();
        for (k, v) in &self.headers {
            match headers.get_mut(k) {
                Some(Value::String(existing)) => {
                    existing.push_str(", ");
                    existing.push_str(v);
                }
                _ => {
                    headers.insert(k.clone(), Value::String(v.clone()));
                }
            }
        }
        let body = if self.body_base64 {
            Value::String(self.body.clone())
        } else {
            serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
        };
        json!({
            "status": self.status,
            "headers": headers,
            "body": body,
            "duration": self.duration_ms,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub snapshot: SnapshotRows,
    pub response: HttpResponse,
    pub headers: Vec<HttpResponseHeader>,
    pub assertions: Vec<HttpResponseAssert>,
    #[serde(skip)]
    pub request: Value,
    #[serde(skip)]
    pub response_value: Value,
}

struct Recorded {
    response: HttpResponse,
    headers: Vec<HttpResponseHeader>,
    assertions: Vec<HttpResponseAssert>,
    request: Value,
    response_value: Value,
}

impl Execution {
    pub fn all_assertions_passed(&self) -> bool {
        self.assertions.iter().all(|a| a.success)
    }

    /// Output bound under the node name in flow scope.
    pub fn output(&self) -> Value {
        json!({ "request": self.request, "response": self.response_value })
    }
}

struct WithResponse<'a> {
    response: &'a Value,
    outer: &'a dyn Scope,
}

impl Scope for WithResponse<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if name == "response" {
            Some(self.response.clone())
        } else {
            self.outer.lookup(name)
        }
    }
}

#[derive(Clone)]
pub struct RequestExecutor {
    store: Store,
    http_client: reqwest::Client,
}

impl RequestExecutor {
    pub fn new(store: Store, timeout: Duration) -> Result<Self, ExecutorError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ExecutorError::Upstream(format!("failed to build client: {}", e)))?;
        Ok(Self { store, http_client })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Resolve, snapshot, send and record one request.
    pub async fn execute(
        &self,
        http_id: Id,
        scope: &dyn Scope,
        user_id: Option<Id>,
        cancel: &CancellationToken,
    ) -> Result<Execution, ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Canceled);
        }
        let (resolved, snapshot) = {
            let mut tx = self.store.begin().await?;
            let resolved = delta_resolver::resolve(&tx, http_id)?;
            let snapshot = delta_resolver::snapshot(&mut tx, &resolved, user_id)?;
            tx.commit();
            (resolved, snapshot)
        };

        let snapshot_id = snapshot.http.id;
        match self
            .send_and_record(http_id, snapshot_id, &resolved, scope, cancel)
            .await
        {
            Ok(recorded) => Ok(Execution {
                snapshot,
                response: recorded.response,
                headers: recorded.headers,
                assertions: recorded.assertions,
                request: recorded.request,
                response_value: recorded.response_value,
            }),
            Err(e) => {
                self.discard_snapshot(snapshot_id).await;
                Err(e)
            }
        }
    }

    async fn send_and_record(
        &self,
        http_id: Id,
        snapshot_id: Id,
        resolved: &ResolvedHttp,
        scope: &dyn Scope,
        cancel: &CancellationToken,
    ) -> Result<Recorded, ExecutorError> {
        let prepared = prepare(resolved, scope)?;
        info!("Executing {} {} ({})", prepared.method, prepared.url, http_id);

        let captured = tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutorError::Canceled),
            result = self.send(&prepared) => result?,
        };
        debug!(
            "Response {} in {} ms ({} bytes)",
            captured.status, captured.duration_ms, captured.size
        );

        let response_value = captured.as_value();
        let outcomes = evaluate_assertions(resolved, &response_value, scope);

        if cancel.is_cancelled() {
            return Err(ExecutorError::Canceled);
        }
        let (response, headers, assertions) =
            self.record(http_id, snapshot_id, &captured, outcomes).await?;
        Ok(Recorded {
            response,
            headers,
            assertions,
            request: prepared.summary(),
            response_value,
        })
    }

    /// Drop the version taken for a call that never produced a response.
    async fn discard_snapshot(&self, snapshot_id: Id) {
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Could not discard snapshot {}: {}", snapshot_id, e);
                return;
            }
        };
        match tx.delete_http(snapshot_id) {
            Ok(_) => tx.commit(),
            Err(e) => warn!("Could not discard snapshot {}: {}", snapshot_id, e),
        }
    }

    async fn send(&self, prepared: &PreparedRequest) -> Result<CapturedResponse, ExecutorError> {
        let method = reqwest::Method::from_bytes(prepared.method.as_bytes())
            .map_err(|_| ExecutorError::InvalidRequest(format!("bad method {}", prepared.method)))?;
        let mut builder = self.http_client.request(method, &prepared.url);
        let mut has_content_type = false;
        for (k, v) in &prepared.headers {
            has_content_type |= k.eq_ignore_ascii_case("content-type");
            builder = builder.header(k.as_str(), v.as_str());
        }
        builder = match &prepared.body {
            PreparedBody::None => builder,
            PreparedBody::Raw(data) => {
                let trimmed = data.trim_start();
                if !has_content_type && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
                    builder = builder.header("content-type", "application/json");
                }
                builder.body(data.clone())
            }
            PreparedBody::UrlEncoded(pairs) => builder.form(pairs),
            PreparedBody::Form(pairs) => {
                let form = pairs
                    .iter()
                    .fold(reqwest::multipart::Form::new(), |form, (k, v)| {
                        form.text(k.clone(), v.clone())
                    });
                builder.multipart(form)
            }
        };

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let bytes = response.bytes().await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        let size = bytes.len() as u64;
        let (body, body_base64) = match String::from_utf8(bytes.to_vec()) {
            Ok(text) => (text, false),
            Err(_) => (BASE64.encode(&bytes), true),
        };
        Ok(CapturedResponse {
            status,
            headers,
            body,
            body_base64,
            duration_ms,
            size,
        })
    }

    async fn record(
        &self,
        http_id: Id,
        snapshot_id: Id,
        captured: &CapturedResponse,
        outcomes: Vec<(Option<Id>, String, bool, Option<String>)>,
    ) -> Result<(HttpResponse, Vec<HttpResponseHeader>, Vec<HttpResponseAssert>), ExecutorError> {
        let response = HttpResponse {
            id: Id::new(),
            http_id,
            snapshot_id,
            status: captured.status,
            body: captured.body.clone(),
            body_base64: captured.body_base64,
            duration_ms: captured.duration_ms,
            size: captured.size,
            time: Utc::now(),
        };
        let headers: Vec<HttpResponseHeader> = captured
            .headers
            .iter()
            .map(|(k, v)| HttpResponseHeader {
                id: Id::new(),
                response_id: response.id,
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        let assertions: Vec<HttpResponseAssert> = outcomes
            .into_iter()
            .map(|(assert_id, expression, success, message)| HttpResponseAssert {
                id: Id::new(),
                response_id: response.id,
                assert_id,
                expression,
                success,
                message,
            })
            .collect();

        let mut tx = self.store.begin().await?;
        tx.create_response(response.clone())?;
        tx.create_response_headers(headers.clone())?;
        tx.create_response_asserts(assertions.clone())?;
        tx.commit();
        Ok((response, headers, assertions))
    }
}

fn expand_pairs(
    rows: &[crate::models::HttpKeyValue],
    scope: &dyn Scope,
) -> Result<Vec<(String, String)>, TemplateError> {
    rows.iter()
        .filter(|kv| kv.enabled)
        .map(|kv| {
            Ok((
                template::expand(&kv.key, scope)?,
                template::expand(&kv.value, scope)?,
            ))
        })
        .collect()
}

/// Expand templates and assemble the outbound request.
pub fn prepare(resolved: &ResolvedHttp, scope: &dyn Scope) -> Result<PreparedRequest, ExecutorError> {
    let raw_url = template::expand(&resolved.http.url, scope)?;
    let mut url = url::Url::parse(&raw_url)
        .map_err(|e| ExecutorError::InvalidRequest(format!("bad url '{}': {}", raw_url, e)))?;
    let params = expand_pairs(resolved.key_values(KeyValueKind::SearchParam), scope)?;
    if !params.is_empty() {
        let mut query = url.query_pairs_mut();
        for (k, v) in &params {
            query.append_pair(k, v);
        }
    }

    let headers = expand_pairs(resolved.key_values(KeyValueKind::Header), scope)?;
    let body = match resolved.http.body_kind {
        BodyKind::None => PreparedBody::None,
        BodyKind::Raw => match &resolved.body_raw {
            Some(raw) => PreparedBody::Raw(template::expand(&raw.data, scope)?),
            None => PreparedBody::None,
        },
        BodyKind::FormData => {
            PreparedBody::Form(expand_pairs(resolved.key_values(KeyValueKind::BodyForm), scope)?)
        }
        BodyKind::UrlEncoded => PreparedBody::UrlEncoded(expand_pairs(
            resolved.key_values(KeyValueKind::BodyUrlEncoded),
            scope,
        )?),
    };

    Ok(PreparedRequest {
        method: resolved.http.method.to_uppercase(),
        url: url.to_string(),
        headers,
        body,
    })
}

/// `(assert id, expression, success, message)` for every enabled assertion.
fn evaluate_assertions(
    resolved: &ResolvedHttp,
    response: &Value,
    scope: &dyn Scope,
) -> Vec<(Option<Id>, String, bool, Option<String>)> {
    let with_response = WithResponse {
        response,
        outer: scope,
    };
    resolved
        .asserts
        .iter()
        .filter(|a| a.enabled)
        .map(|a| match expression::evaluate(&a.expression, &with_response) {
            Ok(v) if truthy(&v) => (Some(a.id), a.expression.clone(), true, None),
            Ok(v) => (
                Some(a.id),
                a.expression.clone(),
                false,
                Some(format!("evaluated to {}", v)),
            ),
            Err(e) => {
                warn!("Assertion '{}' failed to evaluate: {}", a.expression, e);
                (Some(a.id), a.expression.clone(), false, Some(e.to_string()))
            }
        })
        .collect()
}
