//! Bearer token authentication.
//!
//! Tokens are HS256 JWTs issued elsewhere and signed with the shared
//! `JWT_SECRET`. The user ID is read from the `userId` claim, falling back
//! to `sub`.

use std::collections::HashSet;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;
use vrender_models::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Claims read from a verified token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub sub: Option<String>,
}

impl TokenClaims {
    fn into_user_id(self) -> Option<UserId> {
        self.user_id
            .or(self.sub)
            .filter(|id| !id.trim().is_empty())
            .map(UserId::from)
    }
}

/// Verifies HS256 bearer tokens against a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    /// `None` when no secret is configured; every token is rejected
    key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked when present but not required
        validation.required_spec_claims = HashSet::new();

        Self {
            key: (!secret.is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    /// Verify a token and return the user it was issued to.
    pub fn verify(&self, token: &str) -> Result<UserId, ApiError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| ApiError::unauthorized("Authentication is not configured"))?;

        let data = decode::<TokenClaims>(token, key, &self.validation).map_err(|e| {
            debug!("Token validation failed: {}", e);
            ApiError::unauthorized("Invalid or expired token")
        })?;

        data.claims
            .into_user_id()
            .ok_or_else(|| ApiError::unauthorized("Token has no user ID"))
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthorized("Missing or malformed Authorization header"))?;

        let user_id = state.auth.verify(bearer.token())?;
        Ok(AuthUser { user_id })
    }
}
