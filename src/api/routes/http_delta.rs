//! Delta request routes.
//!
//! A delta inherits everything from its base. Scalars are shadowed with PATCH, base
//! children are shadowed with PUT on `/deltas/{id}/overrides/{collection}/{child_id}` and
//! DELETE on the same path drops the shadow so the child inherits again. Rows added
//! directly under the delta (`POST /http/{delta_id}/headers`) exist only in its context.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, put},
};
use serde::Deserialize;
use serde_json::Value;

use super::app_state::{AppState, http_for_member};
use super::auth_context::{CurrentUser, PathId, parse_id};
use super::error::{ApiError, ApiResult, ErrorCode};
use super::http::{editable_http, record_http_cascade};
use crate::ids::Id;
use crate::models::{Http, KeyValueKind};
use crate::services::delta_resolver::{self, ChildPatch, DeltaHttpPatch};
use crate::services::event_sync::{EventBatch, EventKind, SyncEvent};
use crate::storage::Tables;

const ASSERTS: &str = "asserts";

#[derive(Deserialize, Default)]
pub struct CreateDeltaRequest {
    #[serde(default)]
    name: Option<String>,
}

pub fn http_delta_router() -> Router<AppState> {
    Router::new()
        .route("/http/{id}/deltas", get(list_deltas).post(create_delta))
        .route("/deltas/{id}", patch(update_delta).delete(delete_delta))
        .route(
            "/deltas/{id}/overrides/{collection}/{child_id}",
            put(override_child).delete(reset_override),
        )
}

fn delta_for_member(tables: &Tables, id: Id, user_id: Id) -> ApiResult<Http> {
    let http = editable_http(tables, id, user_id)?;
    if !http.is_delta {
        return Err(ApiError::new(
            ErrorCode::FailedPrecondition,
            format!("http {} is not a delta", id),
        ));
    }
    Ok(http)
}

fn parse_override_path(raw: (String, String, String)) -> ApiResult<(Id, String, Id)> {
    let (id, collection, child_id) = raw;
    Ok((parse_id("id", &id)?, collection, parse_id("child_id", &child_id)?))
}

/// GET /http/{id}/deltas
pub async fn list_deltas(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<Http>>> {
    let reader = state.store.reader().await?;
    http_for_member(&reader, id, user.id())?;
    Ok(Json(reader.list_deltas(id)))
}

/// POST /http/{id}/deltas - Create an empty delta over a base request
pub async fn create_delta(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Http>)> {
    let request: CreateDeltaRequest = if body.is_empty() {
        CreateDeltaRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::invalid(e.to_string()))?
    };
    let batch = EventBatch::new();
    let delta = {
        let mut tx = state.store.begin().await?;
        editable_http(&tx, id, user.id())?;
        let delta = delta_resolver::create_delta_http(&mut tx, id, request.name)?;
        tx.commit();
        delta
    };
    state.record(
        &batch,
        SyncEvent::insert(delta.workspace_id, EventKind::Http, delta.id, &delta),
        0,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(delta)))
}

/// PATCH /deltas/{id} - Shadow or reset scalar fields
pub async fn update_delta(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(patch): Json<DeltaHttpPatch>,
) -> ApiResult<Json<Http>> {
    let batch = EventBatch::new();
    let delta = {
        let mut tx = state.store.begin().await?;
        delta_for_member(&tx, id, user.id())?;
        let delta = delta_resolver::update_delta_http(&mut tx, id, patch)?;
        tx.commit();
        delta
    };
    state.record(
        &batch,
        SyncEvent::update(delta.workspace_id, EventKind::Http, id, &delta),
        0,
    );
    state.publish(batch).await;
    Ok(Json(delta))
}

/// DELETE /deltas/{id}
pub async fn delete_delta(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let delta = delta_for_member(&tx, id, user.id())?;
        let cascade = tx.delete_http(id)?;
        record_http_cascade(&state, &batch, &tx, delta.workspace_id, &cascade);
        tx.commit();
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /deltas/{id}/overrides/{collection}/{child_id} - Shadow fields of a base child
pub async fn override_child(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(raw): Path<(String, String, String)>,
    Json(patch): Json<ChildPatch>,
) -> ApiResult<Json<Value>> {
    let (id, collection, child_id) = parse_override_path(raw)?;
    let batch = EventBatch::new();
    let (workspace_id, kind, row_id, created, row) = {
        let mut tx = state.store.begin().await?;
        let delta = delta_for_member(&tx, id, user.id())?;
        let (kind, row_id, created, row) = if collection == ASSERTS {
            let (row, created) = delta_resolver::override_assert(&mut tx, id, child_id, &patch)?;
            (EventKind::HttpAssert, row.id, created, serde_json::to_value(&row))
        } else {
            let kv_kind = KeyValueKind::from_collection(&collection)
                .ok_or_else(|| ApiError::not_found("collection", &collection))?;
            let (row, created) = delta_resolver::override_key_value(&mut tx, id, child_id, &patch)?;
            if row.kind != kv_kind {
                return Err(ApiError::invalid_field(
                    "child_id",
                    &format!("is not in {}", collection),
                ));
            }
            (EventKind::for_key_values(kv_kind), row.id, created, serde_json::to_value(&row))
        };
        let row = row.map_err(|e| ApiError::internal(e.to_string()))?;
        tx.commit();
        (delta.workspace_id, kind, row_id, created, row)
    };
    let event = if created {
        SyncEvent::insert(workspace_id, kind, row_id, &row)
    } else {
        SyncEvent::update(workspace_id, kind, row_id, &row)
    };
    state.record(&batch, event, 0);
    state.publish(batch).await;
    Ok(Json(row))
}

/// DELETE /deltas/{id}/overrides/{collection}/{child_id} - Inherit the base child again
pub async fn reset_override(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(raw): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let (id, collection, child_id) = parse_override_path(raw)?;
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let delta = delta_for_member(&tx, id, user.id())?;
        let (kind, override_id) = if collection == ASSERTS {
            let row = tx
                .find_assert_override(id, child_id)
                .ok_or_else(|| ApiError::not_found("override", child_id))?;
            (EventKind::HttpAssert, row.id)
        } else {
            let kv_kind = KeyValueKind::from_collection(&collection)
                .ok_or_else(|| ApiError::not_found("collection", &collection))?;
            let row = tx
                .find_key_value_override(id, child_id)
                .filter(|row| row.kind == kv_kind)
                .ok_or_else(|| ApiError::not_found("override", child_id))?;
            (EventKind::for_key_values(kv_kind), row.id)
        };
        if kind == EventKind::HttpAssert {
            tx.delete_assert(override_id)?;
        } else {
            tx.delete_key_value(override_id)?;
        }
        tx.commit();
        state.record(
            &batch,
            SyncEvent::delete(delta.workspace_id, kind, override_id),
            0,
        );
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}
