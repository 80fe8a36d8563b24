//! Workspace routes: workspaces, memberships and the file tree.
//!
//! All endpoints require JWT authentication. Reads need membership, renames and member
//! changes need the admin role, deleting a workspace needs the owner.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use super::app_state::{AppState, require_role};
use super::auth_context::{CurrentUser, PathId, PathIds};
use super::error::{ApiError, ApiResult};
use super::http::record_http_cascade;
use super::nullable;
use crate::ids::Id;
use crate::models::{ContentKind, FileEntry, Role, Workspace, WorkspaceMember};
use crate::services::event_sync::{EventBatch, EventKind, SyncEvent};
use crate::storage::Tables;
use crate::storage::ordering::{after_last, between};

#[derive(Deserialize)]
pub struct CreateWorkspaceRequest {
    name: String,
}

#[derive(Deserialize)]
pub struct UpdateWorkspaceRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    active_env_id: Option<Option<Id>>,
    #[serde(default)]
    display_order: Option<f64>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    user_id: Id,
    role: Role,
}

#[derive(Deserialize)]
pub struct CreateFolderRequest {
    name: String,
    #[serde(default)]
    parent_id: Option<Id>,
}

/// Rename and/or move a tree entry. `prev_id`/`next_id` name the siblings to land
/// between; without either the entry goes last under its (new) parent.
#[derive(Deserialize)]
pub struct UpdateFileRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    parent_id: Option<Option<Id>>,
    #[serde(default)]
    prev_id: Option<Id>,
    #[serde(default)]
    next_id: Option<Id>,
}

pub fn workspace_router() -> Router<AppState> {
    Router::new()
        .route("/workspaces", get(list_workspaces).post(create_workspace))
        .route(
            "/workspaces/{id}",
            get(get_workspace)
                .patch(update_workspace)
                .delete(delete_workspace),
        )
        .route(
            "/workspaces/{id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/workspaces/{id}/members/{user_id}",
            axum::routing::delete(remove_member),
        )
        .route("/workspaces/{id}/files", get(list_files))
        .route("/workspaces/{id}/folders", post(create_folder))
        .route("/files/{id}", patch(update_file).delete(delete_file))
}

pub(crate) fn validate_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::invalid_field("name", "must not be empty"));
    }
    Ok(name.to_string())
}

/// Display order for an entry placed between two siblings, or last under `parent_id`.
pub(crate) fn sibling_order(
    tables: &Tables,
    workspace_id: Id,
    parent_id: Option<Id>,
    moving: Option<Id>,
    prev_id: Option<Id>,
    next_id: Option<Id>,
) -> ApiResult<f64> {
    let siblings: Vec<FileEntry> = tables
        .list_children(workspace_id, parent_id)
        .into_iter()
        .filter(|f| Some(f.id) != moving)
        .collect();
    let order_of = |id: Option<Id>, field: &str| -> ApiResult<Option<f64>> {
        match id {
            None => Ok(None),
            Some(id) => siblings
                .iter()
                .find(|f| f.id == id)
                .map(|f| Some(f.display_order))
                .ok_or_else(|| ApiError::invalid_field(field, "is not a sibling under the target parent")),
        }
    };
    let prev = order_of(prev_id, "prev_id")?;
    let next = order_of(next_id, "next_id")?;
    if prev.is_none() && next.is_none() {
        return Ok(after_last(siblings.iter().map(|f| f.display_order)));
    }
    Ok(between(prev, next))
}

/// GET /workspaces - Workspaces the caller belongs to
pub async fn list_workspaces(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Workspace>>> {
    let reader = state.store.reader().await?;
    Ok(Json(reader.list_workspaces_for_user(user.id())))
}

/// POST /workspaces - Create a workspace owned by the caller
pub async fn create_workspace(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateWorkspaceRequest>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    let name = validate_name(&request.name)?;
    let batch = EventBatch::new();
    let workspace = {
        let mut tx = state.store.begin().await?;
        let mut workspace = Workspace::new(Id::new(), &name);
        workspace.display_order = after_last(
            tx.list_workspaces_for_user(user.id())
                .iter()
                .map(|w| w.display_order),
        );
        tx.create_workspace(workspace.clone())?;
        tx.add_member(WorkspaceMember {
            id: Id::new(),
            workspace_id: workspace.id,
            user_id: user.id(),
            role: Role::Owner,
        })?;
        tx.commit();
        workspace
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace.id, EventKind::Workspace, workspace.id, &workspace),
        0,
    );
    state.publish(batch).await;
    info!("Created workspace {} for {}", workspace.id, user.id());
    Ok((StatusCode::CREATED, Json(workspace)))
}

/// GET /workspaces/{id}
pub async fn get_workspace(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Workspace>> {
    let reader = state.store.reader().await?;
    require_role(&reader, id, user.id(), Role::Member)?;
    reader
        .get_workspace(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("workspace", id))
}

/// PATCH /workspaces/{id} - Rename, reorder or switch the active environment
pub async fn update_workspace(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateWorkspaceRequest>,
) -> ApiResult<Json<Workspace>> {
    let batch = EventBatch::new();
    let workspace = {
        let mut tx = state.store.begin().await?;
        let required = if request.name.is_some() {
            Role::Admin
        } else {
            Role::Member
        };
        require_role(&tx, id, user.id(), required)?;
        let mut workspace = tx
            .get_workspace(id)
            .ok_or_else(|| ApiError::not_found("workspace", id))?;
        if let Some(name) = &request.name {
            workspace.name = validate_name(name)?;
        }
        if let Some(active) = request.active_env_id {
            workspace.active_env_id = active;
        }
        if let Some(order) = request.display_order {
            workspace.display_order = order;
        }
        workspace.updated_at = Utc::now();
        tx.update_workspace(workspace.clone())?;
        tx.commit();
        workspace
    };
    state.record(
        &batch,
        SyncEvent::update(id, EventKind::Workspace, id, &workspace),
        0,
    );
    state.publish(batch).await;
    Ok(Json(workspace))
}

/// DELETE /workspaces/{id} - Remove the workspace and everything in it
pub async fn delete_workspace(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        require_role(&tx, id, user.id(), Role::Owner)?;
        tx.delete_workspace(id)?;
        tx.commit();
    }
    state.record(&batch, SyncEvent::delete(id, EventKind::Workspace, id), 0);
    state.publish(batch).await;
    info!("Deleted workspace {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /workspaces/{id}/members
pub async fn list_members(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<WorkspaceMember>>> {
    let reader = state.store.reader().await?;
    require_role(&reader, id, user.id(), Role::Member)?;
    Ok(Json(reader.list_members(id)))
}

/// POST /workspaces/{id}/members
pub async fn add_member(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<AddMemberRequest>,
) -> ApiResult<(StatusCode, Json<WorkspaceMember>)> {
    let mut tx = state.store.begin().await?;
    require_role(&tx, id, user.id(), Role::Admin)?;
    if request.role == Role::Owner && tx.member_role(id, user.id()) != Some(Role::Owner) {
        return Err(ApiError::permission_denied("only owners can add owners"));
    }
    let member = WorkspaceMember {
        id: Id::new(),
        workspace_id: id,
        user_id: request.user_id,
        role: request.role,
    };
    tx.add_member(member.clone())?;
    tx.commit();
    info!("Added {} to workspace {} as {:?}", member.user_id, id, member.role);
    Ok((StatusCode::CREATED, Json(member)))
}

/// DELETE /workspaces/{id}/members/{user_id} - Admins remove anyone, members remove themselves
pub async fn remove_member(
    State(state): State<AppState>,
    user: CurrentUser,
    PathIds(id, member_id): PathIds,
) -> ApiResult<StatusCode> {
    let mut tx = state.store.begin().await?;
    let required = if member_id == user.id() {
        Role::Member
    } else {
        Role::Admin
    };
    require_role(&tx, id, user.id(), required)?;
    tx.remove_member(id, member_id)?;
    tx.commit();
    Ok(StatusCode::NO_CONTENT)
}

/// GET /workspaces/{id}/files - Whole tree, by display order
pub async fn list_files(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<FileEntry>>> {
    let reader = state.store.reader().await?;
    require_role(&reader, id, user.id(), Role::Member)?;
    Ok(Json(reader.list_files(id)))
}

/// POST /workspaces/{id}/folders
pub async fn create_folder(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<CreateFolderRequest>,
) -> ApiResult<(StatusCode, Json<FileEntry>)> {
    let name = validate_name(&request.name)?;
    let batch = EventBatch::new();
    let folder = {
        let mut tx = state.store.begin().await?;
        require_role(&tx, id, user.id(), Role::Member)?;
        let display_order = sibling_order(&tx, id, request.parent_id, None, None, None)?;
        let folder = FileEntry {
            id: Id::new(),
            workspace_id: id,
            parent_id: request.parent_id,
            content_id: None,
            kind: ContentKind::Folder,
            name,
            display_order,
        };
        tx.create_file(folder.clone())?;
        tx.commit();
        folder
    };
    state.record(
        &batch,
        SyncEvent::insert(id, EventKind::Folder, folder.id, &folder),
        0,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(folder)))
}

/// PATCH /files/{id} - Rename or move a tree entry
pub async fn update_file(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateFileRequest>,
) -> ApiResult<Json<FileEntry>> {
    let batch = EventBatch::new();
    let entry = {
        let mut tx = state.store.begin().await?;
        let mut entry = tx
            .get_file(id)
            .ok_or_else(|| ApiError::not_found("file", id))?;
        require_role(&tx, entry.workspace_id, user.id(), Role::Member)?;
        if let Some(name) = &request.name {
            entry.name = validate_name(name)?;
        }
        let moved = request.parent_id.is_some() || request.prev_id.is_some() || request.next_id.is_some();
        if let Some(parent) = request.parent_id {
            entry.parent_id = parent;
        }
        if moved {
            entry.display_order = sibling_order(
                &tx,
                entry.workspace_id,
                entry.parent_id,
                Some(entry.id),
                request.prev_id,
                request.next_id,
            )?;
        }
        tx.update_file(entry.clone())?;
        tx.commit();
        entry
    };
    state.record(
        &batch,
        SyncEvent::update(entry.workspace_id, EventKind::for_file(entry.kind), entry.id, &entry),
        0,
    );
    state.publish(batch).await;
    Ok(Json(entry))
}

/// DELETE /files/{id} - Remove an entry, its descendants and the requests and flows they hold
pub async fn delete_file(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    let mut tx = state.store.begin().await?;
    let entry = tx
        .get_file(id)
        .ok_or_else(|| ApiError::not_found("file", id))?;
    let workspace_id = entry.workspace_id;
    require_role(&tx, workspace_id, user.id(), Role::Member)?;

    let removed = tx.delete_file_tree(id)?;
    for file in &removed {
        state.record(
            &batch,
            SyncEvent::delete(workspace_id, EventKind::for_file(file.kind), file.id),
            0,
        );
        let Some(content_id) = file.content_id else {
            continue;
        };
        match file.kind {
            ContentKind::Http if tx.get_http(content_id).is_some() => {
                let cascade = tx.delete_http(content_id)?;
                record_http_cascade(&state, &batch, &tx, workspace_id, &cascade);
            }
            ContentKind::Flow if tx.get_flow(content_id).is_some() => {
                tx.delete_flow(content_id)?;
                state.record(&batch, SyncEvent::delete(workspace_id, EventKind::Flow, content_id), 0);
            }
            _ => {}
        }
    }
    tx.commit();
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}
