//! API error handling utilities.
//!
//! Every service error converts into an [`ApiError`], which renders as
//! `{code, message, details?}` with a matching HTTP status.

use crate::api::config::ConfigError;
use crate::ids::IdError;
use crate::services::auth_adapter::AdapterError;
use crate::services::auth_service::AuthServiceError;
use crate::services::delta_resolver::ResolveError;
use crate::services::event_sync::SyncError;
use crate::services::flow_runner::RunnerError;
use crate::services::har_importer::HarImportError;
use crate::services::jwt_service::JwtError;
use crate::services::request_executor::ExecutorError;
use crate::services::template::TemplateError;
use crate::services::workspace_bundle::BundleError;
use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Conflict,
    ReferentialError,
    FailedPrecondition,
    UnsupportedFormat,
    MissingData,
    StoreUnavailable,
    UpstreamUnavailable,
    Canceled,
    DeadlineExceeded,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::ReferentialError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorCode::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorCode::MissingData => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            // Client closed request.
            ErrorCode::Canceled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
            ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Values the caller must supply before retrying.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

/// API error response
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn invalid_field(field: &str, constraint: &str) -> Self {
        Self {
            code: ErrorCode::InvalidArgument,
            message: format!("{} {}", field, constraint),
            details: Some(ErrorDetails {
                field: Some(field.to_string()),
                constraint: Some(constraint.to_string()),
                ..Default::default()
            }),
        }
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} {} not found", what, id))
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.details.get_or_insert_with(Default::default).hint = Some(hint.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.code == ErrorCode::Internal {
            error!("Internal error: {}", self.message);
        }
        (self.status(), axum::Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        let code = match &e {
            StorageError::InvalidId(_) | StorageError::Invalid { .. } => ErrorCode::InvalidArgument,
            StorageError::NotFound { .. } => ErrorCode::NotFound,
            StorageError::Conflict { .. } => ErrorCode::Conflict,
            StorageError::ReferentialError { .. } => ErrorCode::ReferentialError,
            StorageError::Unavailable(_) => ErrorCode::StoreUnavailable,
        };
        ApiError::new(code, e.to_string())
    }
}

impl From<IdError> for ApiError {
    fn from(e: IdError) -> Self {
        ApiError::invalid(e.to_string())
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(id) => ApiError::not_found("http", id),
            ResolveError::OrphanDelta { .. } | ResolveError::InconsistentDelta { .. } => {
                ApiError::new(ErrorCode::FailedPrecondition, e.to_string())
            }
            ResolveError::Storage(s) => s.into(),
        }
    }
}

impl From<TemplateError> for ApiError {
    fn from(e: TemplateError) -> Self {
        ApiError::invalid(e.to_string())
    }
}

impl From<ExecutorError> for ApiError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Resolve(r) => r.into(),
            ExecutorError::Template(t) => t.into(),
            ExecutorError::Storage(s) => s.into(),
            ExecutorError::InvalidRequest(m) => ApiError::invalid(m),
            ExecutorError::Upstream(m) => ApiError::new(ErrorCode::UpstreamUnavailable, m),
            ExecutorError::Timeout => {
                ApiError::new(ErrorCode::DeadlineExceeded, "request timed out")
            }
            ExecutorError::Canceled => ApiError::new(ErrorCode::Canceled, "request canceled"),
        }
    }
}

impl From<RunnerError> for ApiError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::FlowNotFound(id) => ApiError::not_found("flow", id),
            RunnerError::InvalidFlow(m) => ApiError::invalid(m),
            RunnerError::Storage(s) => s.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::new(ErrorCode::Canceled, e.to_string())
    }
}

impl From<HarImportError> for ApiError {
    fn from(e: HarImportError) -> Self {
        match e {
            HarImportError::UnsupportedFormat(m) => ApiError::new(ErrorCode::UnsupportedFormat, m),
            HarImportError::Invalid(j) => ApiError::invalid(format!("invalid HAR document: {}", j)),
            HarImportError::WorkspaceNotFound(id) => ApiError::not_found("workspace", id),
            HarImportError::Resolve(r) => r.into(),
            HarImportError::Storage(s) => s.into(),
        }
    }
}

impl From<BundleError> for ApiError {
    fn from(e: BundleError) -> Self {
        match e {
            BundleError::Yaml(y) => ApiError::invalid(format!("invalid bundle: {}", y)),
            BundleError::UnsupportedVersion(_) => {
                ApiError::new(ErrorCode::UnsupportedFormat, e.to_string())
            }
            BundleError::WorkspaceNotFound(id) => ApiError::not_found("workspace", id),
            BundleError::Invalid(m) => ApiError::invalid(m),
            BundleError::Storage(s) => s.into(),
        }
    }
}

impl From<AuthServiceError> for ApiError {
    fn from(e: AuthServiceError) -> Self {
        match e {
            AuthServiceError::Rejected { status, message } => {
                let code = match status {
                    401 => ErrorCode::Unauthenticated,
                    403 => ErrorCode::PermissionDenied,
                    404 => ErrorCode::NotFound,
                    409 => ErrorCode::Conflict,
                    429 => ErrorCode::RateLimited,
                    _ => ErrorCode::InvalidArgument,
                };
                ApiError::new(code, message)
            }
            AuthServiceError::Unavailable(m) => ApiError::new(ErrorCode::UpstreamUnavailable, m),
            AuthServiceError::InvalidResponse(m) => {
                ApiError::new(ErrorCode::UpstreamUnavailable, m)
            }
        }
    }
}

impl From<JwtError> for ApiError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::Fetch(m) => ApiError::new(ErrorCode::UpstreamUnavailable, m),
            other => ApiError::unauthenticated(other.to_string()),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(e: AdapterError) -> Self {
        let code = match &e {
            AdapterError::UnknownModel(_)
            | AdapterError::UnknownField { .. }
            | AdapterError::InvalidValue { .. }
            | AdapterError::InvalidRequest(_) => ErrorCode::InvalidArgument,
            AdapterError::Constraint(_) => ErrorCode::Conflict,
            AdapterError::Sql(_) => ErrorCode::Internal,
        };
        ApiError::new(code, e.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::internal(e.to_string())
    }
}
