//! JWT authentication middleware.
//!
//! Validates the bearer token against the JWKS key set and attaches the caller to the
//! request extensions. Browsers cannot set headers on a WebSocket upgrade, so the token
//! is also accepted as an `access_token` query parameter.

use crate::routes::error::ApiError;
use crate::services::jwt_service::{JwtService, SharedJwtService};
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

fn query_token(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "access_token")
        .map(|(_, v)| v.into_owned())
}

/// Extract the caller's token from the `Authorization` header or the query string.
pub fn request_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        return JwtService::extract_bearer_token(header).map(str::to_string);
    }
    request.uri().query().and_then(query_token)
}

pub async fn require_auth(
    State(jwt): State<SharedJwtService>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = request_token(&request) else {
        debug!("No bearer token on {}", request.uri().path());
        return ApiError::unauthenticated("missing bearer token").into_response();
    };
    match jwt.authenticate(&token).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            warn!("Rejected token on {}: {}", request.uri().path(), e);
            ApiError::from(e).into_response()
        }
    }
}
