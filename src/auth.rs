//! Identity at the edge.
//!
//! Tokens are issued elsewhere; this module only verifies them and hands a
//! trusted `UserId` to the core. Ban checks and other account policy belong
//! to the `IdentityVerifier` implementation, not to the notification core.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::notification::UserId;
use crate::AppState;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve a bearer token to a verified user id.
    async fn verify(&self, token: &str) -> anyhow::Result<UserId>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// HS256 JWT verifier sharing a secret with the auth service.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> anyhow::Result<UserId> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        let user = UserId::new(data.claims.sub);
        user.validate("token subject")?;
        Ok(user)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extractor for routes that act on behalf of the calling user.
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let user = state.verifier.verify(&token).await.map_err(|e| {
            tracing::debug!("bearer token rejected: {}", e);
            AppError::Unauthorized
        })?;
        Ok(AuthUser(user))
    }
}

/// Middleware: validates `X-Admin-Key` against the configured admin key.
pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.admin_key.as_deref() else {
        tracing::warn!("admin API: BOOTH_ADMIN_KEY is not configured, rejecting request");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let provided = req.headers().get("x-admin-key").and_then(|v| v.to_str().ok());
    match provided {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("admin API: invalid key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, exp: i64, secret: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn in_one_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn test_valid_token_yields_subject() {
        let verifier = JwtVerifier::new(SECRET);
        let user = verifier.verify(&token("user-42", in_one_hour(), SECRET)).await.unwrap();
        assert_eq!(user.as_str(), "user-42");
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(verifier.verify(&token("u", in_one_hour(), "other")).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let expired = chrono::Utc::now().timestamp() - 3600;
        assert!(verifier.verify(&token("u", expired, SECRET)).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(verifier.verify(&token(" ", in_one_hour(), SECRET)).await.is_err());
    }

    #[tokio::test]
    async fn test_subject_must_be_a_valid_user_id() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(verifier.verify(&token("has space", in_one_hour(), SECRET)).await.is_err());
        assert!(verifier.verify(&token(&"u".repeat(65), in_one_hour(), SECRET)).await.is_err());
        assert!(verifier.verify(&token(&"u".repeat(64), in_one_hour(), SECRET)).await.is_ok());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert("authorization", "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));
        headers.insert("authorization", "Basic xyz".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
