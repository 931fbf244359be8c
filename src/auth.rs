//! Identity verification seam.
//!
//! The identity provider itself lives outside this service; it hands the
//! mobile client a signed bearer token, and this module only verifies the
//! signature and extracts the verified user. Requests without a valid token
//! are rejected before any pricing or persistence happens.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{errors::ServiceError, AppState};

/// Claim structure for bearer tokens issued by the identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,           // Subject (user ID)
    pub email: Option<String>, // User's email
    pub name: Option<String>,  // User's display name
    pub exp: i64,              // Expiration time
}

/// Verified user identity extracted from the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Verifies an HS256 bearer token and returns the embedded identity.
pub fn verify_bearer_token(token: &str, secret: &str) -> Result<AuthUser, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServiceError::Unauthorized(format!("Invalid bearer token: {e}")))?;

    Ok(AuthUser {
        user_id: data.claims.sub,
        email: data.claims.email,
        display_name: data.claims.name,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("Missing Authorization header".to_string())
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ServiceError::Unauthorized("Authorization header must be a Bearer token".to_string())
        })?;

        verify_bearer_token(token, &state.config.jwt_secret)
    }
}
