//! Workspace bundle routes (YAML export and import).

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::info;

use super::app_state::{AppState, require_role};
use super::auth_context::{CurrentUser, PathId};
use super::error::{ApiError, ApiResult, ErrorCode};
use crate::models::{Role, Workspace};
use crate::services::event_sync::{EventBatch, EventKind, SyncEvent};
use crate::services::workspace_bundle::{self, BundleImportOptions};

const YAML_TYPES: [&str; 4] = [
    "application/yaml",
    "application/x-yaml",
    "text/yaml",
    "text/plain",
];

#[derive(Deserialize, Default)]
pub struct ImportQuery {
    #[serde(default)]
    preserve_ids: bool,
}

pub fn bundle_router() -> Router<AppState> {
    Router::new()
        .route("/workspaces/{id}/export", get(export_bundle))
        .route("/workspaces/import", post(import_bundle))
}

fn check_content_type(headers: &HeaderMap) -> ApiResult<()> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };
    let mime = value
        .to_str()
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if YAML_TYPES.contains(&mime.as_str()) {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorCode::UnsupportedFormat,
            format!("expected a YAML body, got {}", mime),
        ))
    }
}

/// GET /workspaces/{id}/export - The workspace as a YAML bundle
pub async fn export_bundle(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<impl IntoResponse> {
    let yaml = {
        let reader = state.store.reader().await?;
        require_role(&reader, id, user.id(), Role::Member)?;
        let bundle = workspace_bundle::export(&reader, id)?;
        workspace_bundle::to_yaml(&bundle)?
    };
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml))
}

/// POST /workspaces/import - Create a workspace owned by the caller from a YAML bundle
pub async fn import_bundle(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ImportQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    check_content_type(&headers)?;
    let text = std::str::from_utf8(&body)
        .map_err(|_| ApiError::new(ErrorCode::UnsupportedFormat, "bundle is not UTF-8"))?;
    let bundle = workspace_bundle::from_yaml(text)?;
    let options = BundleImportOptions {
        preserve_ids: query.preserve_ids,
        owner: user.id(),
    };
    let workspace = {
        let mut tx = state.store.begin().await?;
        let workspace = workspace_bundle::import(&mut tx, &bundle, &options)?;
        tx.commit();
        workspace
    };
    let batch = EventBatch::new();
    state.record(
        &batch,
        SyncEvent::insert(workspace.id, EventKind::Workspace, workspace.id, &workspace),
        0,
    );
    state.publish(batch).await;
    info!("Imported bundle as workspace {} for {}", workspace.id, user.id());
    Ok((StatusCode::CREATED, Json(workspace)))
}
