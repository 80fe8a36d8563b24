//! Authentication routes backed by the upstream auth service.
//!
//! Sign-up, sign-in, refresh, sign-out and the OAuth handshake are public and rate
//! limited. Each successful login returns the long-lived session token together with a
//! short-lived access token; refresh mints a new access token from the session token.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use super::app_state::AppState;
use super::auth_context::CurrentUser;
use super::error::{ApiError, ApiResult};
use crate::middleware::rate_limit::rate_limit_middleware;
use crate::services::auth_service::{AuthUser, SessionGrant};
use crate::services::jwt_service::AuthenticatedUser;

#[derive(Deserialize, ToSchema)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SessionTokenRequest {
    pub session_token: String,
}

#[derive(Deserialize, ToSchema)]
pub struct OAuthUrlRequest {
    pub provider: String,
    pub redirect_uri: String,
}

#[derive(Deserialize)]
pub struct OAuthCallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

/// Tokens returned by every successful login.
#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: AuthUser,
    pub session_token: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct OAuthUrlResponse {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Create the public auth router (rate limited).
pub fn auth_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/sign-up", post(sign_up))
        .route("/sign-in", post(sign_in))
        .route("/sign-out", post(sign_out))
        .route("/refresh", post(refresh_token))
        .route("/oauth-url", post(oauth_url))
        .route("/oauth/{provider}/callback", get(oauth_callback))
        .layer(middleware::from_fn_with_state(
            state.auth_limiter.clone(),
            rate_limit_middleware,
        ))
}

/// Auth routes that need a validated token.
pub fn session_router() -> Router<AppState> {
    Router::new().route("/auth/me", get(me))
}

fn require_non_empty(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::invalid_field(field, "must not be empty"));
    }
    Ok(())
}

async fn login(state: &AppState, grant: SessionGrant) -> ApiResult<AuthResponse> {
    let token = state.auth.token(&grant.session_token).await?;
    Ok(AuthResponse {
        user: grant.user,
        session_token: grant.session_token,
        access_token: token.token,
        expires_at: token.expires_at,
    })
}

/// POST /auth/sign-up - Create an account and log it in
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    tag = "Auth",
    request_body = SignUpRequest,
    responses(
        (status = 200, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input", body = ApiError),
        (status = 409, description = "Email already registered", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError)
    )
)]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<SignUpRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = request.email.trim().to_lowercase();
    require_non_empty("email", &email)?;
    if !email.contains('@') {
        return Err(ApiError::invalid_field("email", "must be an email address"));
    }
    require_non_empty("password", &request.password)?;

    state
        .auth
        .create_user(&email, &request.password, request.name.as_deref())
        .await?;
    let grant = state
        .auth
        .verify_credentials(&email, &request.password)
        .await?;
    info!("Signed up {}", grant.user.id);
    Ok(Json(login(&state, grant).await?))
}

/// POST /auth/sign-in - Exchange credentials for tokens
#[utoipa::path(
    post,
    path = "/auth/sign-in",
    tag = "Auth",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Bad credentials", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError)
    )
)]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<SignInRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = request.email.trim().to_lowercase();
    require_non_empty("email", &email)?;
    require_non_empty("password", &request.password)?;
    let grant = state
        .auth
        .verify_credentials(&email, &request.password)
        .await
        .inspect_err(|e| warn!("Sign-in failed for {}: {}", email, e))?;
    Ok(Json(login(&state, grant).await?))
}

/// POST /auth/refresh - Mint a new access token from a session token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = SessionTokenRequest,
    responses(
        (status = 200, description = "New access token", body = AccessTokenResponse),
        (status = 401, description = "Session expired or revoked", body = ApiError)
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<SessionTokenRequest>,
) -> ApiResult<Json<AccessTokenResponse>> {
    require_non_empty("session_token", &request.session_token)?;
    let token = state.auth.token(&request.session_token).await?;
    Ok(Json(AccessTokenResponse {
        access_token: token.token,
        expires_at: token.expires_at,
    }))
}

/// POST /auth/sign-out - Revoke the session
#[utoipa::path(
    post,
    path = "/auth/sign-out",
    tag = "Auth",
    request_body = SessionTokenRequest,
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Unknown session", body = ApiError)
    )
)]
pub async fn sign_out(
    State(state): State<AppState>,
    Json(request): Json<SessionTokenRequest>,
) -> ApiResult<StatusCode> {
    require_non_empty("session_token", &request.session_token)?;
    state.auth.revoke_session(&request.session_token).await?;
    info!("Session revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/oauth-url - Start an OAuth login with a provider
#[utoipa::path(
    post,
    path = "/auth/oauth-url",
    tag = "Auth",
    request_body = OAuthUrlRequest,
    responses(
        (status = 200, description = "Provider authorization URL", body = OAuthUrlResponse)
    )
)]
pub async fn oauth_url(
    State(state): State<AppState>,
    Json(request): Json<OAuthUrlRequest>,
) -> ApiResult<Json<OAuthUrlResponse>> {
    require_non_empty("provider", &request.provider)?;
    url::Url::parse(&request.redirect_uri)
        .map_err(|e| ApiError::invalid_field("redirect_uri", &e.to_string()))?;
    let url = state
        .auth
        .oauth_url(&request.provider, &request.redirect_uri)
        .await?;
    Ok(Json(OAuthUrlResponse {
        url: url.url,
        state: url.state,
    }))
}

/// GET /auth/oauth/{provider}/callback - Finish an OAuth login
#[utoipa::path(
    get,
    path = "/auth/oauth/{provider}/callback",
    tag = "Auth",
    params(
        ("provider" = String, Path, description = "OAuth provider"),
        ("code" = String, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "State issued with the URL")
    ),
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 400, description = "Missing code", body = ApiError)
    )
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> ApiResult<Json<AuthResponse>> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::invalid_field("code", "is required"))?;
    let grant = state
        .auth
        .exchange_oauth_code(&provider, &code, query.state.as_deref())
        .await?;
    info!("OAuth login via {} for {}", provider, grant.user.id);
    Ok(Json(login(&state, grant).await?))
}

/// GET /auth/me - The caller resolved from the access token
pub async fn me(user: CurrentUser) -> Json<AuthenticatedUser> {
    Json(user.0)
}
