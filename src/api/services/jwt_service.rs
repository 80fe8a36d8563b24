//! JWT validation against a JWKS key set.
//!
//! Tokens are issued by the auth backend. Keys are fetched from `JWKS_URL` and cached by
//! `kid`; a token signed with an unknown `kid` triggers one refresh before it is rejected.

use crate::ids::Id;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),
    #[error("Failed to fetch JWKS: {0}")]
    Fetch(String),
}

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Identity resolved from a valid token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: Id,
    pub email: Option<String>,
    pub name: Option<String>,
}

struct CachedKey {
    key: DecodingKey,
    alg: Option<jsonwebtoken::Algorithm>,
}

pub struct JwtService {
    jwks_url: Option<String>,
    http_client: reqwest::Client,
    keys: RwLock<HashMap<String, CachedKey>>,
}

fn key_map(set: &JwkSet) -> HashMap<String, CachedKey> {
    let mut keys = HashMap::new();
    for jwk in &set.keys {
        let Some(kid) = jwk.common.key_id.clone() else {
            warn!("Skipping JWK without kid");
            continue;
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                // Key-management algorithms (RSA-OAEP etc.) map to no signing algorithm.
                let alg = jwk
                    .common
                    .key_algorithm
                    .and_then(|a| serde_json::to_value(a).ok())
                    .and_then(|v| serde_json::from_value(v).ok());
                keys.insert(kid, CachedKey { key, alg });
            }
            Err(e) => warn!("Skipping unusable JWK {}: {}", kid, e),
        }
    }
    keys
}

impl JwtService {
    /// A validator that fetches keys from `jwks_url` on demand.
    pub fn new(jwks_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            jwks_url: Some(jwks_url.to_string()),
            http_client,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// A validator over a fixed key set; unknown keys are never refetched.
    pub fn from_key_set(set: &JwkSet) -> Self {
        Self {
            jwks_url: None,
            http_client: reqwest::Client::new(),
            keys: RwLock::new(key_map(set)),
        }
    }

    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Replace the cached keys with the current JWKS document. Returns the key count.
    pub async fn refresh(&self) -> Result<usize, JwtError> {
        let Some(url) = &self.jwks_url else {
            return Ok(self.key_count().await);
        };
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| JwtError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(JwtError::Fetch(format!("status {}", response.status())));
        }
        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| JwtError::Fetch(e.to_string()))?;
        let keys = key_map(&set);
        let count = keys.len();
        *self.keys.write().await = keys;
        info!("Loaded {} signing keys from {}", count, url);
        Ok(count)
    }

    /// Initial fetch with retries; used at startup.
    pub async fn refresh_with_retry(&self, attempts: u32, delay: Duration) -> Result<usize, JwtError> {
        let mut last = JwtError::Fetch("no attempts made".to_string());
        for attempt in 1..=attempts.max(1) {
            match self.refresh().await {
                Ok(count) => return Ok(count),
                Err(e) => {
                    warn!("JWKS fetch attempt {} of {} failed: {}", attempt, attempts, e);
                    last = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        Err(last)
    }

    /// Validate a token (signature and expiry) and return its claims.
    pub async fn validate(&self, token: &str) -> Result<Claims, JwtError> {
        let header = decode_header(token).map_err(|e| JwtError::Invalid(e.to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| JwtError::Invalid("token has no kid".to_string()))?;

        if !self.keys.read().await.contains_key(&kid) && self.jwks_url.is_some() {
            debug!("Unknown kid {}, refreshing key set", kid);
            self.refresh().await?;
        }

        let keys = self.keys.read().await;
        let cached = keys
            .get(&kid)
            .ok_or_else(|| JwtError::UnknownKey(kid.clone()))?;
        if cached.alg.is_some_and(|alg| alg != header.alg) {
            return Err(JwtError::Invalid("algorithm does not match key".to_string()));
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = true;
        validation.validate_aud = false;

        decode::<Claims>(token, &cached.key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    JwtError::Invalid("bad signature".to_string())
                }
                _ => JwtError::Invalid(e.to_string()),
            })
    }

    /// Validate and resolve the caller; a subject that is not an id is rejected.
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, JwtError> {
        let claims = self.validate(token).await?;
        let user_id = Id::parse(&claims.sub)
            .map_err(|_| JwtError::Invalid("subject is not a user id".to_string()))?;
        Ok(AuthenticatedUser {
            user_id,
            email: claims.email,
            name: claims.name,
        })
    }

    /// Extract bearer token from Authorization header
    pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
        auth_header.strip_prefix("Bearer ").filter(|t| !t.is_empty())
    }
}

/// Shared JWT service for use across the application
pub type SharedJwtService = Arc<JwtService>;
