//! HTTP request routes.
//!
//! Requests live in the file tree. Child collections are addressed by segment
//! (`headers`, `params`, `body-form`, `body-urlencoded`); rows created under a delta are
//! delta-context additions, while edits to override rows go through the resolver so only
//! shadow columns are written. Snapshot rows taken by runs are read only.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::app_state::{AppState, http_for_member, require_role};
use super::auth_context::{CurrentUser, PathId, parse_id};
use super::flow::node_levels;
use super::error::{ApiError, ApiResult, ErrorCode};
use super::workspace::{sibling_order, validate_name};
use crate::ids::Id;
use crate::models::{
    BodyKind, ContentKind, FileEntry, Http, HttpAssert, HttpBodyRaw, HttpKeyValue,
    HttpResponse, HttpResponseAssert, HttpResponseHeader, HttpVersion, KeyValueKind, Role,
};
use crate::services::delta_resolver::{self, ChildPatch, ResolvedHttp};
use crate::services::event_sync::{EventBatch, EventKind, SyncEvent};
use crate::services::request_executor::Execution;
use crate::storage::{HttpCascade, Tables};
use crate::storage::ordering::{after_last, between};

#[derive(Deserialize)]
pub struct CreateHttpRequest {
    name: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    folder_id: Option<Id>,
    #[serde(default)]
    body_kind: Option<BodyKind>,
    #[serde(default)]
    description: String,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Deserialize)]
pub struct UpdateHttpRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    body_kind: Option<BodyKind>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateKeyValueRequest {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    prev_id: Option<Id>,
    #[serde(default)]
    next_id: Option<Id>,
}

/// Field edits plus an optional move between two siblings.
#[derive(Deserialize)]
pub struct UpdateChildRequest {
    #[serde(flatten)]
    patch: ChildPatch,
    #[serde(default)]
    prev_id: Option<Id>,
    #[serde(default)]
    next_id: Option<Id>,
}

#[derive(Deserialize)]
pub struct CreateAssertRequest {
    expression: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    prev_id: Option<Id>,
    #[serde(default)]
    next_id: Option<Id>,
}

#[derive(Deserialize)]
pub struct BodyRawRequest {
    data: String,
}

#[derive(Deserialize)]
pub struct RunQuery {
    #[serde(default)]
    environment_id: Option<Id>,
}

#[derive(Serialize)]
pub struct ResponseRecord {
    #[serde(flatten)]
    response: HttpResponse,
    headers: Vec<HttpResponseHeader>,
    asserts: Vec<HttpResponseAssert>,
}

#[derive(Serialize)]
pub struct HttpHistory {
    versions: Vec<HttpVersion>,
    responses: Vec<ResponseRecord>,
}

pub fn http_router() -> Router<AppState> {
    Router::new()
        .route(
            "/workspaces/{id}/http",
            get(list_http).post(create_http),
        )
        .route(
            "/http/{id}",
            get(get_http).patch(update_http).delete(delete_http),
        )
        .route("/http/{id}/resolved", get(get_resolved))
        .route("/http/{id}/run", post(run_http))
        .route("/http/{id}/history", get(get_history))
        .route(
            "/http/{id}/body-raw",
            get(get_body_raw).put(put_body_raw),
        )
        .route("/http/{id}/asserts", get(list_asserts).post(create_assert))
        .route(
            "/http/{id}/{collection}",
            get(list_key_values).post(create_key_value),
        )
        .route(
            "/key-values/{id}",
            patch(update_key_value).delete(delete_key_value),
        )
        .route("/asserts/{id}", patch(update_assert).delete(delete_assert))
        .route("/body-raw/{id}", axum::routing::delete(delete_body_raw))
}

/// A request the caller may edit: snapshots are frozen.
pub(crate) fn editable_http(tables: &Tables, id: Id, user_id: Id) -> ApiResult<Http> {
    let http = http_for_member(tables, id, user_id)?;
    if http.is_version {
        return Err(ApiError::new(
            ErrorCode::FailedPrecondition,
            format!("http {} is a version snapshot", id),
        ));
    }
    Ok(http)
}

fn collection_kind(segment: &str) -> ApiResult<KeyValueKind> {
    KeyValueKind::from_collection(segment).ok_or_else(|| {
        ApiError::not_found("collection", segment).with_hint(
            "expected one of headers, params, body-form, body-urlencoded, asserts, body-raw",
        )
    })
}

/// Order for a child landing between `prev_id` and `next_id` among `siblings`.
fn child_order(
    siblings: &[(Id, f64)],
    moving: Option<Id>,
    prev_id: Option<Id>,
    next_id: Option<Id>,
) -> ApiResult<f64> {
    let others: Vec<&(Id, f64)> = siblings
        .iter()
        .filter(|(id, _)| Some(*id) != moving)
        .collect();
    let order_of = |id: Option<Id>, field: &str| -> ApiResult<Option<f64>> {
        match id {
            None => Ok(None),
            Some(id) => others
                .iter()
                .find(|(sid, _)| *sid == id)
                .map(|(_, order)| Some(*order))
                .ok_or_else(|| ApiError::invalid_field(field, "is not a sibling")),
        }
    };
    let prev = order_of(prev_id, "prev_id")?;
    let next = order_of(next_id, "next_id")?;
    if prev.is_none() && next.is_none() {
        return Ok(after_last(others.iter().map(|(_, order)| *order)));
    }
    Ok(between(prev, next))
}

fn record_execution(state: &AppState, batch: &EventBatch, workspace_id: Id, execution: &Execution) {
    let snapshot = &execution.snapshot;
    state.record(
        batch,
        SyncEvent::insert(workspace_id, EventKind::Http, snapshot.http.id, &snapshot.http),
        0,
    );
    for row in &snapshot.key_values {
        state.record(
            batch,
            SyncEvent::insert(workspace_id, EventKind::for_key_values(row.kind), row.id, row),
            0,
        );
    }
    if let Some(body) = &snapshot.body_raw {
        state.record(
            batch,
            SyncEvent::insert(workspace_id, EventKind::HttpBodyRaw, body.id, body),
            0,
        );
    }
    for row in &snapshot.asserts {
        state.record(
            batch,
            SyncEvent::insert(workspace_id, EventKind::HttpAssert, row.id, row),
            0,
        );
    }
    state.record(
        batch,
        SyncEvent::insert(
            workspace_id,
            EventKind::HttpVersion,
            snapshot.version.id,
            &snapshot.version,
        ),
        0,
    );
    state.record(
        batch,
        SyncEvent::insert(
            workspace_id,
            EventKind::HttpResponse,
            execution.response.id,
            &execution.response,
        ),
        0,
    );
    for header in &execution.headers {
        state.record(
            batch,
            SyncEvent::insert(workspace_id, EventKind::HttpResponseHeader, header.id, header),
            0,
        );
    }
    for assertion in &execution.assertions {
        state.record(
            batch,
            SyncEvent::insert(
                workspace_id,
                EventKind::HttpResponseAssert,
                assertion.id,
                assertion,
            ),
            0,
        );
    }
}

/// GET /workspaces/{id}/http - Base requests of a workspace
pub async fn list_http(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<Http>>> {
    let reader = state.store.reader().await?;
    require_role(&reader, id, user.id(), Role::Member)?;
    Ok(Json(reader.list_http(id)))
}

/// POST /workspaces/{id}/http - Create a request and its tree entry
pub async fn create_http(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(workspace_id): PathId,
    Json(request): Json<CreateHttpRequest>,
) -> ApiResult<(StatusCode, Json<Http>)> {
    let name = validate_name(&request.name)?;
    let method = request.method.trim().to_uppercase();
    if method.is_empty() {
        return Err(ApiError::invalid_field("method", "must not be empty"));
    }
    let batch = EventBatch::new();
    let (http, file) = {
        let mut tx = state.store.begin().await?;
        require_role(&tx, workspace_id, user.id(), Role::Member)?;
        let mut http = Http::new(Id::new(), workspace_id, &name, &method, &request.url);
        http.folder_id = request.folder_id;
        http.body_kind = request.body_kind.unwrap_or_default();
        http.description = request.description;
        tx.create_http(http.clone())?;
        let file = FileEntry {
            id: Id::new(),
            workspace_id,
            parent_id: request.folder_id,
            content_id: Some(http.id),
            kind: ContentKind::Http,
            name,
            display_order: sibling_order(&tx, workspace_id, request.folder_id, None, None, None)?,
        };
        tx.create_file(file.clone())?;
        tx.commit();
        (http, file)
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::Http, http.id, &http),
        0,
    );
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::for_file(file.kind), file.id, &file),
        0,
    );
    state.publish(batch).await;
    info!("Created http {} in {}", http.id, workspace_id);
    Ok((StatusCode::CREATED, Json(http)))
}

/// GET /http/{id}
pub async fn get_http(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Http>> {
    let reader = state.store.reader().await?;
    Ok(Json(http_for_member(&reader, id, user.id())?))
}

/// PATCH /http/{id} - Edit a base request (deltas are edited through /deltas)
pub async fn update_http(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateHttpRequest>,
) -> ApiResult<Json<Http>> {
    let batch = EventBatch::new();
    let http = {
        let mut tx = state.store.begin().await?;
        let mut http = editable_http(&tx, id, user.id())?;
        if http.is_delta {
            return Err(ApiError::new(
                ErrorCode::FailedPrecondition,
                format!("http {} is a delta", id),
            )
            .with_hint("edit deltas through PATCH /deltas/{id}"));
        }
        if let Some(name) = &request.name {
            http.name = validate_name(name)?;
            if let Some(mut file) = tx.file_for_content(id) {
                file.name = http.name.clone();
                tx.update_file(file.clone())?;
                state.record(
                    &batch,
                    SyncEvent::update(http.workspace_id, EventKind::for_file(file.kind), file.id, &file),
                    0,
                );
            }
        }
        if let Some(method) = request.method {
            let method = method.trim().to_uppercase();
            if method.is_empty() {
                return Err(ApiError::invalid_field("method", "must not be empty"));
            }
            http.method = method;
        }
        if let Some(url) = request.url {
            http.url = url;
        }
        if let Some(kind) = request.body_kind {
            http.body_kind = kind;
        }
        if let Some(description) = request.description {
            http.description = description;
        }
        http.updated_at = chrono::Utc::now();
        tx.update_http(http.clone())?;
        tx.commit();
        http
    };
    state.record(
        &batch,
        SyncEvent::update(http.workspace_id, EventKind::Http, id, &http),
        0,
    );
    state.publish(batch).await;
    Ok(Json(http))
}

/// Record a delete for every row a request delete removed, and an update for every
/// request node it detached. `tables` must already reflect the delete.
pub(crate) fn record_http_cascade(
    state: &AppState,
    batch: &EventBatch,
    tables: &Tables,
    workspace_id: Id,
    cascade: &HttpCascade,
) {
    let delete = |kind: EventKind, id: Id| {
        state.record(batch, SyncEvent::delete(workspace_id, kind, id), 0);
    };
    for file in &cascade.files {
        delete(EventKind::for_file(file.kind), file.id);
    }
    for &id in &cascade.http {
        delete(EventKind::Http, id);
    }
    for row in &cascade.key_values {
        delete(EventKind::for_key_values(row.kind), row.id);
    }
    let children = [
        (EventKind::HttpBodyRaw, &cascade.body_raw),
        (EventKind::HttpAssert, &cascade.asserts),
        (EventKind::HttpVersion, &cascade.versions),
        (EventKind::HttpResponse, &cascade.responses),
        (EventKind::HttpResponseHeader, &cascade.response_headers),
        (EventKind::HttpResponseAssert, &cascade.response_asserts),
    ];
    for (kind, ids) in children {
        for &id in ids {
            delete(kind, id);
        }
    }
    for node in &cascade.nodes {
        let level = node_levels(tables, node.flow_id)
            .get(&node.id)
            .copied()
            .unwrap_or(0);
        state.record(
            batch,
            SyncEvent::update(workspace_id, EventKind::Node, node.id, node),
            level,
        );
    }
}

/// DELETE /http/{id} - Remove a request with its deltas, snapshots and responses
pub async fn delete_http(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let http = editable_http(&tx, id, user.id())?;
        let cascade = tx.delete_http(id)?;
        record_http_cascade(&state, &batch, &tx, http.workspace_id, &cascade);
        tx.commit();
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /http/{id}/resolved - The request with deltas applied
pub async fn get_resolved(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<ResolvedHttp>> {
    let reader = state.store.reader().await?;
    http_for_member(&reader, id, user.id())?;
    Ok(Json(delta_resolver::resolve(&reader, id)?))
}

/// POST /http/{id}/run - Execute the request against an environment
pub async fn run_http(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Query(query): Query<RunQuery>,
) -> ApiResult<Json<Execution>> {
    let (workspace_id, scope) = {
        let reader = state.store.reader().await?;
        let http = editable_http(&reader, id, user.id())?;
        let environment_id = match query.environment_id {
            Some(env_id) => {
                let env = reader
                    .get_environment(env_id)
                    .filter(|e| e.workspace_id == http.workspace_id)
                    .ok_or_else(|| ApiError::not_found("environment", env_id))?;
                Some(env.id)
            }
            None => reader
                .get_workspace(http.workspace_id)
                .and_then(|w| w.active_env_id),
        };
        let scope: Map<String, Value> = environment_id
            .map(|env_id| reader.list_variables(env_id))
            .unwrap_or_default()
            .into_iter()
            .filter(|v| v.enabled)
            .map(|v| (v.key, Value::String(v.value)))
            .collect();
        (http.workspace_id, scope)
    };

    let cancel = state.shutdown.child_token();
    let execution = state
        .executor
        .execute(id, &scope, Some(user.id()), &cancel)
        .await?;

    let batch = EventBatch::new();
    record_execution(&state, &batch, workspace_id, &execution);
    state.publish(batch).await;
    Ok(Json(execution))
}

/// GET /http/{id}/history - Versions and recorded responses, newest first
pub async fn get_history(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<HttpHistory>> {
    let reader = state.store.reader().await?;
    http_for_member(&reader, id, user.id())?;
    let responses = reader
        .list_responses(id)
        .into_iter()
        .map(|response| ResponseRecord {
            headers: reader.list_response_headers(response.id),
            asserts: reader.list_response_asserts(response.id),
            response,
        })
        .collect();
    Ok(Json(HttpHistory {
        versions: reader.list_versions(id),
        responses,
    }))
}

/// GET /http/{id}/{collection} - Own rows of one key/value collection
pub async fn list_key_values(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, collection)): Path<(String, String)>,
) -> ApiResult<Json<Vec<HttpKeyValue>>> {
    let id = parse_id("id", &id)?;
    let kind = collection_kind(&collection)?;
    let reader = state.store.reader().await?;
    http_for_member(&reader, id, user.id())?;
    Ok(Json(reader.list_key_values(id, kind)))
}

/// POST /http/{id}/{collection} - Add a row (a delta-context addition on deltas)
pub async fn create_key_value(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, collection)): Path<(String, String)>,
    Json(request): Json<CreateKeyValueRequest>,
) -> ApiResult<(StatusCode, Json<HttpKeyValue>)> {
    let id = parse_id("id", &id)?;
    let kind = collection_kind(&collection)?;
    if request.key.trim().is_empty() && kind != KeyValueKind::SearchParam {
        return Err(ApiError::invalid_field("key", "must not be empty"));
    }
    let batch = EventBatch::new();
    let (workspace_id, row) = {
        let mut tx = state.store.begin().await?;
        let http = editable_http(&tx, id, user.id())?;
        let siblings: Vec<(Id, f64)> = tx
            .list_key_values(id, kind)
            .iter()
            .map(|kv| (kv.id, kv.display_order))
            .collect();
        let mut row = HttpKeyValue::new(Id::new(), id, kind, request.key.trim(), &request.value);
        row.enabled = request.enabled.unwrap_or(true);
        row.description = request.description;
        row.display_order = child_order(&siblings, None, request.prev_id, request.next_id)?;
        tx.create_key_value(row.clone())?;
        tx.commit();
        (http.workspace_id, row)
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::for_key_values(kind), row.id, &row),
        0,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(row)))
}

/// PATCH /key-values/{id} - Edit or reorder a row; override rows write shadow columns
pub async fn update_key_value(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateChildRequest>,
) -> ApiResult<Json<HttpKeyValue>> {
    let batch = EventBatch::new();
    let (workspace_id, row) = {
        let mut tx = state.store.begin().await?;
        let existing = tx
            .get_key_value(id)
            .ok_or_else(|| ApiError::not_found("key_value", id))?;
        let http = editable_http(&tx, existing.http_id, user.id())?;
        let mut row = match existing.parent_id.filter(|_| existing.is_delta) {
            Some(parent_id) => {
                delta_resolver::override_key_value(&mut tx, existing.http_id, parent_id, &request.patch)?.0
            }
            None => {
                let mut row = existing;
                if let Some(key) = &request.patch.key {
                    row.key = key.trim().to_string();
                }
                if let Some(value) = &request.patch.value {
                    row.value = value.clone();
                }
                if let Some(enabled) = request.patch.enabled {
                    row.enabled = enabled;
                }
                if let Some(description) = &request.patch.description {
                    row.description = description.clone();
                }
                row
            }
        };
        if request.prev_id.is_some() || request.next_id.is_some() {
            let siblings: Vec<(Id, f64)> = tx
                .list_key_values(row.http_id, row.kind)
                .iter()
                .map(|kv| (kv.id, kv.display_order))
                .collect();
            row.display_order = child_order(&siblings, Some(row.id), request.prev_id, request.next_id)?;
        }
        tx.update_key_value(row.clone())?;
        tx.commit();
        (http.workspace_id, row)
    };
    state.record(
        &batch,
        SyncEvent::update(workspace_id, EventKind::for_key_values(row.kind), row.id, &row),
        0,
    );
    state.publish(batch).await;
    Ok(Json(row))
}

/// DELETE /key-values/{id} - Remove a row and the overrides pointing at it
pub async fn delete_key_value(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let existing = tx
            .get_key_value(id)
            .ok_or_else(|| ApiError::not_found("key_value", id))?;
        let http = editable_http(&tx, existing.http_id, user.id())?;
        for row in tx.delete_key_value(id)? {
            state.record(
                &batch,
                SyncEvent::delete(http.workspace_id, EventKind::for_key_values(row.kind), row.id),
                0,
            );
        }
        tx.commit();
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /http/{id}/asserts
pub async fn list_asserts(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<HttpAssert>>> {
    let reader = state.store.reader().await?;
    http_for_member(&reader, id, user.id())?;
    Ok(Json(reader.list_asserts(id)))
}

/// POST /http/{id}/asserts
pub async fn create_assert(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<CreateAssertRequest>,
) -> ApiResult<(StatusCode, Json<HttpAssert>)> {
    if request.expression.trim().is_empty() {
        return Err(ApiError::invalid_field("expression", "must not be empty"));
    }
    let batch = EventBatch::new();
    let (workspace_id, row) = {
        let mut tx = state.store.begin().await?;
        let http = editable_http(&tx, id, user.id())?;
        let siblings: Vec<(Id, f64)> = tx
            .list_asserts(id)
            .iter()
            .map(|a| (a.id, a.display_order))
            .collect();
        let mut row = HttpAssert::new(Id::new(), id, request.expression.trim());
        row.enabled = request.enabled.unwrap_or(true);
        row.description = request.description;
        row.display_order = child_order(&siblings, None, request.prev_id, request.next_id)?;
        tx.create_assert(row.clone())?;
        tx.commit();
        (http.workspace_id, row)
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::HttpAssert, row.id, &row),
        0,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(row)))
}

/// PATCH /asserts/{id}
pub async fn update_assert(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateChildRequest>,
) -> ApiResult<Json<HttpAssert>> {
    let batch = EventBatch::new();
    let (workspace_id, row) = {
        let mut tx = state.store.begin().await?;
        let existing = tx
            .get_assert(id)
            .ok_or_else(|| ApiError::not_found("assert", id))?;
        let http = editable_http(&tx, existing.http_id, user.id())?;
        let mut row = match existing.parent_id.filter(|_| existing.is_delta) {
            Some(parent_id) => {
                delta_resolver::override_assert(&mut tx, existing.http_id, parent_id, &request.patch)?.0
            }
            None => {
                let mut row = existing;
                if let Some(expression) = &request.patch.expression {
                    row.expression = expression.trim().to_string();
                }
                if let Some(enabled) = request.patch.enabled {
                    row.enabled = enabled;
                }
                if let Some(description) = &request.patch.description {
                    row.description = description.clone();
                }
                row
            }
        };
        if request.prev_id.is_some() || request.next_id.is_some() {
            let siblings: Vec<(Id, f64)> = tx
                .list_asserts(row.http_id)
                .iter()
                .map(|a| (a.id, a.display_order))
                .collect();
            row.display_order = child_order(&siblings, Some(row.id), request.prev_id, request.next_id)?;
        }
        tx.update_assert(row.clone())?;
        tx.commit();
        (http.workspace_id, row)
    };
    state.record(
        &batch,
        SyncEvent::update(workspace_id, EventKind::HttpAssert, row.id, &row),
        0,
    );
    state.publish(batch).await;
    Ok(Json(row))
}

/// DELETE /asserts/{id}
pub async fn delete_assert(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let existing = tx
            .get_assert(id)
            .ok_or_else(|| ApiError::not_found("assert", id))?;
        let http = editable_http(&tx, existing.http_id, user.id())?;
        for row in tx.delete_assert(id)? {
            state.record(
                &batch,
                SyncEvent::delete(http.workspace_id, EventKind::HttpAssert, row.id),
                0,
            );
        }
        tx.commit();
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /http/{id}/body-raw - The effective raw body (resolved on deltas)
pub async fn get_body_raw(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Option<HttpBodyRaw>>> {
    let reader = state.store.reader().await?;
    http_for_member(&reader, id, user.id())?;
    Ok(Json(delta_resolver::resolve(&reader, id)?.body_raw))
}

/// PUT /http/{id}/body-raw - Set the raw body; on a delta this writes an override
pub async fn put_body_raw(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<BodyRawRequest>,
) -> ApiResult<Json<HttpBodyRaw>> {
    let batch = EventBatch::new();
    let (workspace_id, row, created) = {
        let mut tx = state.store.begin().await?;
        let http = editable_http(&tx, id, user.id())?;
        let (row, created) = if http.is_delta {
            delta_resolver::override_body_raw(&mut tx, id, &request.data)?
        } else {
            match tx.body_raw_for(id) {
                Some(mut existing) => {
                    existing.data = request.data;
                    tx.update_body_raw(existing.clone())?;
                    (existing, false)
                }
                None => {
                    let row = HttpBodyRaw::new(Id::new(), id, &request.data);
                    tx.create_body_raw(row.clone())?;
                    (row, true)
                }
            }
        };
        tx.commit();
        (http.workspace_id, row, created)
    };
    let event = if created {
        SyncEvent::insert(workspace_id, EventKind::HttpBodyRaw, row.id, &row)
    } else {
        SyncEvent::update(workspace_id, EventKind::HttpBodyRaw, row.id, &row)
    };
    state.record(&batch, event, 0);
    state.publish(batch).await;
    Ok(Json(row))
}

/// DELETE /body-raw/{id}
pub async fn delete_body_raw(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let existing = tx
            .get_body_raw(id)
            .ok_or_else(|| ApiError::not_found("body_raw", id))?;
        let http = editable_http(&tx, existing.http_id, user.id())?;
        for row in tx.delete_body_raw(id)? {
            state.record(
                &batch,
                SyncEvent::delete(http.workspace_id, EventKind::HttpBodyRaw, row.id),
                0,
            );
        }
        tx.commit();
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}
