//! Client for the upstream auth backend.
//!
//! Every call is a JSON `POST {BETTERAUTH_URL}/<endpoint>`. The public auth routes are
//! thin translators over these calls.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum AuthServiceError {
    /// Backend answered with a client error (bad credentials, duplicate email ...).
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("auth backend unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected auth backend response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A backend session; `token` is the long-lived session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionGrant {
    pub user: AuthUser,
    #[serde(alias = "sessionToken")]
    pub session_token: String,
}

/// Short-lived JWT minted from a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    #[serde(default, alias = "expiresAt")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthUrl {
    pub url: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct AuthService {
    base_url: String,
    http_client: reqwest::Client,
}

impl AuthService {
    pub fn new(base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T, AuthServiceError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("Calling auth backend {}", endpoint);
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthServiceError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<BackendError>(&text)
                .ok()
                .and_then(|e| e.message.or(e.error))
                .unwrap_or_else(|| format!("{} rejected the request", endpoint));
            warn!("Auth backend rejected {}: {} {}", endpoint, status, message);
            return Err(AuthServiceError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(AuthServiceError::Unavailable(format!(
                "{} returned {}",
                endpoint, status
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AuthServiceError::InvalidResponse(e.to_string()))
    }

    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<AuthUser, AuthServiceError> {
        #[derive(Deserialize)]
        struct Created {
            user: AuthUser,
        }
        let created: Created = self
            .call(
                "create-user-with-password",
                json!({ "email": email, "password": password, "name": name }),
            )
            .await?;
        info!("Created user {}", created.user.id);
        Ok(created.user)
    }

    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionGrant, AuthServiceError> {
        self.call(
            "verify-credentials",
            json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Mint an access token for a session. Refresh is this call with the stored session token.
    pub async fn token(&self, session_token: &str) -> Result<AccessToken, AuthServiceError> {
        self.call("token", json!({ "sessionToken": session_token })).await
    }

    pub async fn revoke_session(&self, session_token: &str) -> Result<(), AuthServiceError> {
        let _: serde_json::Value = self
            .call("revoke-session", json!({ "sessionToken": session_token }))
            .await?;
        Ok(())
    }

    pub async fn oauth_url(
        &self,
        provider: &str,
        redirect_uri: &str,
    ) -> Result<OAuthUrl, AuthServiceError> {
        self.call(
            "oauth-url",
            json!({ "provider": provider, "redirectUri": redirect_uri }),
        )
        .await
    }

    pub async fn exchange_oauth_code(
        &self,
        provider: &str,
        code: &str,
        state: Option<&str>,
    ) -> Result<SessionGrant, AuthServiceError> {
        self.call(
            "exchange-oauth-code",
            json!({ "provider": provider, "code": code, "state": state }),
        )
        .await
    }
}
