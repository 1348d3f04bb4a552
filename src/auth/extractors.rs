use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::error::AppError;

/// Name of the httpOnly cookie carrying the bearer token.
pub const AUTH_COOKIE: &str = "token";

/// Extracts and validates the bearer token, returning the user ID.
/// The `Authorization` header wins over the cookie when both are present.
pub struct AuthUser(pub Uuid);

fn bearer_from_parts(parts: &Parts) -> Result<String, AppError> {
    if let Some(header) = parts.headers.get(AUTHORIZATION) {
        let value = header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid Authorization header".into()))?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .ok_or_else(|| AppError::Unauthorized("Invalid auth scheme".into()))?;
        return Ok(token.trim().to_string());
    }

    CookieJar::from_headers(&parts.headers)
        .get(AUTH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Not authorized, no token".into()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_from_parts(parts)?;
        let keys = JwtKeys::from_ref(state);
        match keys.verify(&token) {
            Ok(claims) => Ok(AuthUser(claims.sub)),
            Err(e) => {
                warn!(error = %e, "invalid or expired token");
                Err(AppError::Unauthorized("Invalid or expired token".into()))
            }
        }
    }
}
