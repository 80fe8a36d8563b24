//! Authentication context utilities.
//!
//! Provides extractors for the caller attached by the auth middleware and for ids in
//! the path.

use super::error::ApiError;
use crate::ids::Id;
use crate::services::jwt_service::AuthenticatedUser;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

/// The authenticated caller.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthenticatedUser);

impl CurrentUser {
    pub fn id(&self) -> Id {
        self.0.user_id
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| ApiError::unauthenticated("authentication required"))
    }
}

/// Parse a path segment into an id.
pub fn parse_id(field: &str, raw: &str) -> Result<Id, ApiError> {
    Id::parse(raw).map_err(|e| ApiError::invalid_field(field, &e.to_string()))
}

/// Single id in the path, e.g. `/flows/{id}`.
pub struct PathId(pub Id);

impl<S: Send + Sync> FromRequestParts<S> for PathId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::invalid(e.body_text()))?;
        parse_id("id", &raw).map(PathId)
    }
}

/// Two ids in the path, e.g. `/http/{id}/headers/{child_id}`.
pub struct PathIds(pub Id, pub Id);

impl<S: Send + Sync> FromRequestParts<S> for PathIds {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((first, second)) = Path::<(String, String)>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::invalid(e.body_text()))?;
        Ok(PathIds(parse_id("id", &first)?, parse_id("child_id", &second)?))
    }
}
