//! Environment and variable routes.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, patch},
};
use serde::Deserialize;

use super::app_state::{AppState, require_role};
use super::auth_context::{CurrentUser, PathId};
use super::error::{ApiError, ApiResult};
use super::workspace::validate_name;
use crate::ids::Id;
use crate::models::{Environment, Role, Variable};
use crate::services::event_sync::{EventBatch, EventKind, SyncEvent};
use crate::storage::Tables;
use crate::storage::ordering::after_last;

#[derive(Deserialize)]
pub struct CreateEnvironmentRequest {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
pub struct UpdateEnvironmentRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    display_order: Option<f64>,
}

#[derive(Deserialize)]
pub struct CreateVariableRequest {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
pub struct UpdateVariableRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    display_order: Option<f64>,
}

pub fn environment_router() -> Router<AppState> {
    Router::new()
        .route(
            "/workspaces/{id}/environments",
            get(list_environments).post(create_environment),
        )
        .route(
            "/environments/{id}",
            patch(update_environment).delete(delete_environment),
        )
        .route(
            "/environments/{id}/variables",
            get(list_variables).post(create_variable),
        )
        .route(
            "/variables/{id}",
            patch(update_variable).delete(delete_variable),
        )
}

fn environment_for_member(tables: &Tables, id: Id, user_id: Id) -> ApiResult<Environment> {
    let env = tables
        .get_environment(id)
        .ok_or_else(|| ApiError::not_found("environment", id))?;
    require_role(tables, env.workspace_id, user_id, Role::Member)?;
    Ok(env)
}

fn validate_key(key: &str) -> ApiResult<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ApiError::invalid_field("key", "must not be empty"));
    }
    Ok(key.to_string())
}

/// GET /workspaces/{id}/environments
pub async fn list_environments(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<Environment>>> {
    let reader = state.store.reader().await?;
    require_role(&reader, id, user.id(), Role::Member)?;
    Ok(Json(reader.list_environments(id)))
}

/// POST /workspaces/{id}/environments
pub async fn create_environment(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(workspace_id): PathId,
    Json(request): Json<CreateEnvironmentRequest>,
) -> ApiResult<(StatusCode, Json<Environment>)> {
    let name = validate_name(&request.name)?;
    let batch = EventBatch::new();
    let env = {
        let mut tx = state.store.begin().await?;
        require_role(&tx, workspace_id, user.id(), Role::Member)?;
        let env = Environment {
            id: Id::new(),
            workspace_id,
            name,
            description: request.description,
            display_order: after_last(
                tx.list_environments(workspace_id)
                    .iter()
                    .map(|e| e.display_order),
            ),
        };
        tx.create_environment(env.clone())?;
        tx.commit();
        env
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::Environment, env.id, &env),
        0,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(env)))
}

/// PATCH /environments/{id}
pub async fn update_environment(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateEnvironmentRequest>,
) -> ApiResult<Json<Environment>> {
    let batch = EventBatch::new();
    let env = {
        let mut tx = state.store.begin().await?;
        let mut env = environment_for_member(&tx, id, user.id())?;
        if let Some(name) = &request.name {
            env.name = validate_name(name)?;
        }
        if let Some(description) = request.description {
            env.description = description;
        }
        if let Some(order) = request.display_order {
            env.display_order = order;
        }
        tx.update_environment(env.clone())?;
        tx.commit();
        env
    };
    state.record(
        &batch,
        SyncEvent::update(env.workspace_id, EventKind::Environment, id, &env),
        0,
    );
    state.publish(batch).await;
    Ok(Json(env))
}

/// DELETE /environments/{id} - Removes the environment and its variables
pub async fn delete_environment(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let env = environment_for_member(&tx, id, user.id())?;
        for variable in tx.list_variables(id) {
            state.record(
                &batch,
                SyncEvent::delete(env.workspace_id, EventKind::EnvVariable, variable.id),
                0,
            );
        }
        tx.delete_environment(id)?;
        state.record(
            &batch,
            SyncEvent::delete(env.workspace_id, EventKind::Environment, id),
            0,
        );
        tx.commit();
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /environments/{id}/variables
pub async fn list_variables(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<Variable>>> {
    let reader = state.store.reader().await?;
    environment_for_member(&reader, id, user.id())?;
    Ok(Json(reader.list_variables(id)))
}

/// POST /environments/{id}/variables
pub async fn create_variable(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(environment_id): PathId,
    Json(request): Json<CreateVariableRequest>,
) -> ApiResult<(StatusCode, Json<Variable>)> {
    let key = validate_key(&request.key)?;
    let batch = EventBatch::new();
    let (workspace_id, variable) = {
        let mut tx = state.store.begin().await?;
        let env = environment_for_member(&tx, environment_id, user.id())?;
        let variable = Variable {
            id: Id::new(),
            environment_id,
            key,
            value: request.value,
            enabled: request.enabled.unwrap_or(true),
            description: request.description,
            display_order: after_last(
                tx.list_variables(environment_id)
                    .iter()
                    .map(|v| v.display_order),
            ),
        };
        tx.create_variable(variable.clone())?;
        tx.commit();
        (env.workspace_id, variable)
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::EnvVariable, variable.id, &variable),
        0,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(variable)))
}

/// PATCH /variables/{id}
pub async fn update_variable(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateVariableRequest>,
) -> ApiResult<Json<Variable>> {
    let batch = EventBatch::new();
    let (workspace_id, variable) = {
        let mut tx = state.store.begin().await?;
        let mut variable = tx
            .get_variable(id)
            .ok_or_else(|| ApiError::not_found("variable", id))?;
        let env = environment_for_member(&tx, variable.environment_id, user.id())?;
        if let Some(key) = &request.key {
            variable.key = validate_key(key)?;
        }
        if let Some(value) = request.value {
            variable.value = value;
        }
        if let Some(enabled) = request.enabled {
            variable.enabled = enabled;
        }
        if let Some(description) = request.description {
            variable.description = description;
        }
        if let Some(order) = request.display_order {
            variable.display_order = order;
        }
        tx.update_variable(variable.clone())?;
        tx.commit();
        (env.workspace_id, variable)
    };
    state.record(
        &batch,
        SyncEvent::update(workspace_id, EventKind::EnvVariable, id, &variable),
        0,
    );
    state.publish(batch).await;
    Ok(Json(variable))
}

/// DELETE /variables/{id}
pub async fn delete_variable(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let variable = tx
            .get_variable(id)
            .ok_or_else(|| ApiError::not_found("variable", id))?;
        let env = environment_for_member(&tx, variable.environment_id, user.id())?;
        tx.delete_variable(id)?;
        tx.commit();
        state.record(
            &batch,
            SyncEvent::delete(env.workspace_id, EventKind::EnvVariable, id),
            0,
        );
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}
