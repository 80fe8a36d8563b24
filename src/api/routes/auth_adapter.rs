//! Storage endpoint for the auth backend.
//!
//! The auth backend keeps its users, sessions and keys here through a JSON verb
//! protocol. The route sits outside the JWT layer and is guarded by a shared secret.

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::app_state::AppState;
use super::error::{ApiError, ApiResult};
use crate::services::auth_adapter::{AdapterRequest, AuthAdapter};

pub const SECRET_HEADER: &str = "x-adapter-secret";

pub fn auth_adapter_router() -> Router<AppState> {
    Router::new().route("/auth-adapter", post(handle_adapter_request))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<Arc<AuthAdapter>> {
    let (Some(adapter), Some(secret)) = (&state.adapter, &state.config.adapter_secret) else {
        return Err(ApiError::not_found("route", "/auth-adapter"));
    };
    let presented = headers
        .get(SECRET_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    if !constant_time_eq(presented, secret.as_bytes()) {
        warn!("Auth adapter call with a bad secret");
        return Err(ApiError::unauthenticated("invalid adapter secret"));
    }
    Ok(adapter.clone())
}

/// POST /auth-adapter - Run one adapter verb
pub async fn handle_adapter_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AdapterRequest>,
) -> ApiResult<Json<Value>> {
    let adapter = authorize(&state, &headers)?;
    let result = tokio::task::spawn_blocking(move || adapter.handle(&request))
        .await
        .map_err(|e| ApiError::internal(format!("adapter task failed: {}", e)))??;
    Ok(Json(result))
}
