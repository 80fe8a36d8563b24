//! Application state management.
//!
//! Defines the AppState struct that holds the shared store, event bus, executors and
//! auth clients every handler works through.

use super::error::{ApiError, ApiResult};
use crate::api::config::AppConfig;
use crate::ids::Id;
use crate::middleware::rate_limit::{RateLimiterState, create_rate_limiter_with_quota};
use crate::models::{Flow, Http, Role};
use crate::services::auth_adapter::AuthAdapter;
use crate::services::auth_service::AuthService;
use crate::services::event_sync::{EventBatch, EventStreamer, SyncEvent};
use crate::services::flow_runner::FlowRunner;
use crate::services::jwt_service::{JwtService, SharedJwtService};
use crate::services::request_executor::{ExecutorError, RequestExecutor};
use crate::storage::{Store, Tables};
use axum::extract::FromRef;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state shared across all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    /// Change feed consumed by the sync socket.
    pub events: Arc<EventStreamer>,
    pub executor: RequestExecutor,
    pub runner: FlowRunner,
    pub jwt: SharedJwtService,
    pub auth: Arc<AuthService>,
    /// Mounted only when an adapter secret is configured.
    pub adapter: Option<Arc<AuthAdapter>>,
    pub auth_limiter: RateLimiterState,
    /// Fired on shutdown; streams and publishes observe it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create the application state over a fresh store.
    pub fn new(
        config: AppConfig,
        jwt: SharedJwtService,
        adapter: Option<Arc<AuthAdapter>>,
    ) -> Result<Self, StateError> {
        let store = Store::new();
        let executor = RequestExecutor::new(store.clone(), config.http_client_timeout)?;
        let runner = FlowRunner::new(
            store.clone(),
            executor.clone(),
            config.flow_max_parallel,
            config.flow_timeout,
        );
        let auth_client = reqwest::Client::builder()
            .timeout(config.http_client_timeout)
            .build()?;
        Ok(Self {
            events: Arc::new(EventStreamer::new(config.event_buffer)),
            auth: Arc::new(AuthService::new(&config.betterauth_url, auth_client)),
            auth_limiter: create_rate_limiter_with_quota(config.rate_limit_per_minute),
            config: Arc::new(config),
            store,
            executor,
            runner,
            jwt,
            adapter,
            shutdown: CancellationToken::new(),
        })
    }

    /// State with a JWKS-backed validator built from `config`.
    pub fn from_config(config: AppConfig) -> Result<Self, StateError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_client_timeout)
            .build()?;
        let jwt = Arc::new(JwtService::new(&config.jwks_url, client));
        Self::new(config, jwt, None)
    }

    /// Queue `event` for publication once the surrounding transaction commits.
    pub fn record(&self, batch: &EventBatch, event: SyncEvent, sub_order: i64) {
        batch.record(&self.events, event, sub_order);
    }

    /// Deliver a committed batch. The data is already durable, so failures are logged only.
    pub async fn publish(&self, batch: EventBatch) {
        if let Err(e) = batch.publish(&self.shutdown).await {
            warn!("Event publish interrupted: {}", e);
        }
    }
}

/// Check that `user_id` holds at least `required` in `workspace_id`.
pub fn require_role(tables: &Tables, workspace_id: Id, user_id: Id, required: Role) -> ApiResult<()> {
    if tables.get_workspace(workspace_id).is_none() {
        return Err(ApiError::not_found("workspace", workspace_id));
    }
    match tables.member_role(workspace_id, user_id) {
        Some(role) if role.allows(required) => Ok(()),
        Some(_) => Err(ApiError::permission_denied(format!(
            "{:?} role required in workspace {}",
            required, workspace_id
        ))),
        None => Err(ApiError::permission_denied(format!(
            "not a member of workspace {}",
            workspace_id
        ))),
    }
}

/// Load a request and check the caller may work on it.
pub fn http_for_member(tables: &Tables, http_id: Id, user_id: Id) -> ApiResult<Http> {
    let http = tables
        .get_http(http_id)
        .ok_or_else(|| ApiError::not_found("http", http_id))?;
    require_role(tables, http.workspace_id, user_id, Role::Member)?;
    Ok(http)
}

/// Load a flow and check the caller may work on it.
pub fn flow_for_member(tables: &Tables, flow_id: Id, user_id: Id) -> ApiResult<Flow> {
    let flow = tables
        .get_flow(flow_id)
        .ok_or_else(|| ApiError::not_found("flow", flow_id))?;
    require_role(tables, flow.workspace_id, user_id, Role::Member)?;
    Ok(flow)
}

impl FromRef<AppState> for SharedJwtService {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.jwt.clone()
    }
}

impl FromRef<AppState> for RateLimiterState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_limiter.clone()
    }
}

impl FromRef<AppState> for Store {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.store.clone()
    }
}
