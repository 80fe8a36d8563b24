//! API routes module - organizes all route handlers.
//!
//! Auth, the auth adapter, health and the OpenAPI document are public; everything else
//! sits behind the JWT layer.

pub mod app_state;
pub mod auth;
pub mod auth_adapter;
pub mod auth_context;
pub mod bundle;
pub mod environment;
pub mod error;
pub mod flow;
pub mod http;
pub mod http_delta;
pub mod import;
pub mod openapi;
pub mod sync;
pub mod workspace;

use axum::{Json, Router, middleware as axum_middleware, routing::get};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

pub use app_state::AppState;

use crate::middleware::auth::require_auth;

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create the main API router combining all route modules.
///
/// State is applied by the caller (`main` or a `TestServer`).
pub fn create_api_router(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .merge(workspace::workspace_router())
        .merge(environment::environment_router())
        .merge(http::http_router())
        .merge(http_delta::http_delta_router())
        .merge(flow::flow_router())
        .merge(import::import_router())
        .merge(bundle::bundle_router())
        .merge(sync::sync_router())
        .merge(auth::session_router())
        .layer(axum_middleware::from_fn_with_state(
            state.jwt.clone(),
            require_auth,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/auth", auth::auth_router(state))
        .merge(auth_adapter::auth_adapter_router())
        .merge(openapi::openapi_router())
        .merge(protected)
}
