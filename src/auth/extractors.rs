use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::error::AuthError;

/// Extracts and validates the bearer access token, returning the user ID.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::Unauthorized("Missing access token"))?;

        // Expect "Bearer <token>"
        let token = match auth_header.split_once(' ') {
            Some(("Bearer", token)) if !token.is_empty() => token,
            _ => return Err(AuthError::Unauthorized("Invalid authorization format")),
        };

        let keys = JwtKeys::from_ref(state);
        let user_id = keys.verify(token).map_err(|e| {
            warn!(error = %e, "access token rejected");
            AuthError::from(e)
        })?;

        Ok(AuthUser(user_id))
    }
}
